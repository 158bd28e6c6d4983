//! HTTP(S) snapshot source.
//!
//! IP cameras (and ESP32-class boards) expose a "current still" endpoint that
//! returns one JPEG per request. Each `capture()` fetches one snapshot.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use super::FrameSource;
use crate::frame::{EncodedFrame, MAX_FRAME_BYTES};

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Snapshot URL, e.g. "http://192.168.1.40/capture".
    pub url: String,
    pub timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/capture".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct SnapshotSource {
    config: SnapshotConfig,
    agent: Option<ureq::Agent>,
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            agent: None,
        }
    }
}

impl FrameSource for SnapshotSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn connect(&mut self) -> Result<()> {
        if self.agent.is_none() {
            self.agent = Some(
                ureq::AgentBuilder::new()
                    .timeout(self.config.timeout)
                    .build(),
            );
            log::info!("frame source {} connected", self.config.url);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.agent.take().is_some() {
            log::info!("frame source {} disconnected", self.config.url);
        }
    }

    fn is_active(&self) -> bool {
        self.agent.is_some()
    }

    fn capture(&mut self) -> Result<Option<EncodedFrame>> {
        let Some(agent) = self.agent.as_ref() else {
            return Ok(None);
        };
        let jpeg = fetch_snapshot(agent, &self.config.url)?;
        EncodedFrame::from_jpeg(jpeg).map(Some)
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_FRAME_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read snapshot body")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty snapshot from {}", url));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_snapshot_source_skips_without_network() {
        let mut source = SnapshotSource::new(SnapshotConfig::default());
        assert!(!source.is_active());
        assert!(source.capture().expect("capture").is_none());
    }
}
