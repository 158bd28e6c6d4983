use anyhow::Result;

use super::result::DetectionResult;
use crate::frame::EncodedFrame;

/// Client for the remote detection service.
///
/// The fire/smoke/crowd models are opaque: a client ships one still to the
/// service and returns the structured counts it answers with. Any failure
/// (transport, non-2xx status, malformed body) is returned as an error and
/// ends the current cycle without an incident record. Clients do not retry.
pub trait DetectionClient: Send {
    /// Client identifier used in logs.
    fn name(&self) -> &str;

    /// Submit a frame and wait for the service's counts.
    fn detect(&mut self, frame: &EncodedFrame) -> Result<DetectionResult>;
}
