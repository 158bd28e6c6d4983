//! HTTP detection client.
//!
//! POSTs the frame as base64 JSON and parses the service's counts. Non-2xx
//! responses, transport errors and unparseable bodies are all errors.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use crate::detect::backend::DetectionClient;
use crate::detect::result::DetectionResult;
use crate::detect::wire::{DetectionPayload, DetectionRequest};
use crate::frame::EncodedFrame;

/// Response bodies larger than this are rejected.
const MAX_RESPONSE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpDetectionConfig {
    /// Detection endpoint, e.g. "http://127.0.0.1:5001/detect".
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for HttpDetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5001/detect".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpDetectionClient {
    config: HttpDetectionConfig,
    agent: ureq::Agent,
}

impl HttpDetectionClient {
    pub fn new(config: HttpDetectionConfig) -> Result<Self> {
        let url = url::Url::parse(&config.endpoint).context("parse detection endpoint")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "detection endpoint must be http(s), got '{}'",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }
}

impl DetectionClient for HttpDetectionClient {
    fn name(&self) -> &str {
        &self.config.endpoint
    }

    fn detect(&mut self, frame: &EncodedFrame) -> Result<DetectionResult> {
        let request = DetectionRequest::from_frame(frame);
        let response = match self.agent.post(&self.config.endpoint).send_json(&request) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(anyhow!(
                    "detection service returned status {}: {}",
                    code,
                    body.chars().take(200).collect::<String>()
                ));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("post frame to {}", self.config.endpoint)))
            }
        };
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_string(&mut body)
            .context("read detection response")?;
        if body.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(anyhow!(
                "detection response exceeds {} bytes",
                MAX_RESPONSE_BYTES
            ));
        }
        Ok(DetectionPayload::parse(&body)?.into_result())
    }
}
