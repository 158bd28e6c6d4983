//! JSON wire format of the detection service.
//!
//! Request: `{ "img_base64": "<base64 jpeg>" }`.
//! Response: counts plus optional annotated images. Every response field is
//! optional; absent or `null` fields default to zero/unknown.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::result::{clamp_density, DetectionResult, UNKNOWN_LOCATION};
use crate::frame::EncodedFrame;

#[derive(Debug, Serialize)]
pub struct DetectionRequest {
    pub img_base64: String,
}

impl DetectionRequest {
    pub fn from_frame(frame: &EncodedFrame) -> Self {
        Self {
            img_base64: STANDARD.encode(frame.as_jpeg()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectionPayload {
    #[serde(default)]
    pub fire_count: Option<u32>,
    #[serde(default)]
    pub smoke_count: Option<u32>,
    #[serde(default)]
    pub crowd_density: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "alertType")]
    pub alert_type: Option<String>,
    /// Fire/smoke model annotation.
    #[serde(default)]
    pub annotated_img_base64: Option<String>,
    /// Crowd model annotation.
    #[serde(default)]
    pub crowd_annotated_img_base64: Option<String>,
}

impl DetectionPayload {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).context("parse detection response")
    }

    /// Resolve the payload into a result, defaulting every missing field.
    pub fn into_result(self) -> DetectionResult {
        let location = self
            .location
            .map(|location| location.trim().to_string())
            .filter(|location| !location.is_empty())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
        let annotated_image = self
            .annotated_img_base64
            .as_deref()
            .and_then(decode_annotation)
            .or_else(|| {
                self.crowd_annotated_img_base64
                    .as_deref()
                    .and_then(decode_annotation)
            });
        DetectionResult {
            fire_count: self.fire_count.unwrap_or(0),
            smoke_count: self.smoke_count.unwrap_or(0),
            crowd_density: clamp_density(self.crowd_density.unwrap_or(0.0)),
            location,
            service_label: self.alert_type.filter(|label| !label.trim().is_empty()),
            annotated_image,
        }
    }
}

fn decode_annotation(encoded: &str) -> Option<Vec<u8>> {
    if encoded.is_empty() {
        return None;
    }
    match STANDARD.decode(encoded) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::debug!("dropping undecodable annotated image: {}", e);
            None
        }
    }
}
