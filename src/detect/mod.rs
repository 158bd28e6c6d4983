mod backend;
mod backends;
mod result;
mod wire;

pub use backend::DetectionClient;
pub use backends::{HttpDetectionClient, HttpDetectionConfig, ScriptedDetector};
pub use result::{DetectionResult, UNKNOWN_LOCATION};
pub use wire::{DetectionPayload, DetectionRequest};
