//! Synthetic frame source (`stub://`) for tests and demos.

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::{EncodedFrame, MAX_FRAME_DIMENSION};

#[derive(Clone, Debug)]
pub struct StubConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            width: 320,
            height: 240,
        }
    }
}

/// Synthetic source. Always has a frame while connected.
pub struct StubSource {
    config: StubConfig,
    label: String,
    active: bool,
    frame_count: u64,
}

impl StubSource {
    pub fn new(config: StubConfig) -> Self {
        let label = format!("stub://{}", config.name);
        Self {
            config,
            label,
            active: false,
            frame_count: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Gradient that shifts every frame so consecutive stills differ.
    fn generate_pixels(&self) -> Result<Vec<u8>> {
        let (width, height) = (self.config.width, self.config.height);
        if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "synthetic frame {}x{} exceeds the {}px limit",
                width,
                height,
                MAX_FRAME_DIMENSION
            ));
        }
        let byte_count = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(3))
            .ok_or_else(|| anyhow!("synthetic frame {}x{} is too large", width, height))?;
        let mut pixels = vec![0u8; byte_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.frame_count) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl FrameSource for StubSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn connect(&mut self) -> Result<()> {
        if !self.active {
            log::info!("frame source {} connected (synthetic)", self.label);
            self.active = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.active {
            log::info!("frame source {} disconnected", self.label);
            self.active = false;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn capture(&mut self) -> Result<Option<EncodedFrame>> {
        if !self.active {
            return Ok(None);
        }
        let pixels = self.generate_pixels()?;
        let frame = EncodedFrame::encode_rgb(pixels, self.config.width, self.config.height)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }
}
