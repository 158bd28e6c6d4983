pub mod http;
pub mod stub;

pub use http::{HttpDetectionClient, HttpDetectionConfig};
pub use stub::ScriptedDetector;
