//! Local still-image source.
//!
//! Reads a JPEG from disk on every capture, so an external grabber that keeps
//! overwriting the file acts as a live stream. The source never writes to the
//! path and never follows URLs.

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::FrameSource;
use crate::frame::EncodedFrame;

pub struct FileSource {
    path: PathBuf,
    label: String,
    active: bool,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        let label = path.display().to_string();
        Self {
            path,
            label,
            active: false,
        }
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn connect(&mut self) -> Result<()> {
        if !self.active {
            log::info!("frame source {} connected", self.label);
            self.active = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn capture(&mut self) -> Result<Option<EncodedFrame>> {
        if !self.active {
            return Ok(None);
        }
        let jpeg = std::fs::read(&self.path)
            .with_context(|| format!("read still image {}", self.path.display()))?;
        EncodedFrame::from_jpeg(jpeg).map(Some)
    }
}
