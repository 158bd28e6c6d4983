use serde::Serialize;

/// Location reported when the service does not name one.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Structured counts returned by the detection service for one frame.
///
/// Every field has a zero/unknown default so a sparse service answer still
/// classifies cleanly.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    pub fire_count: u32,
    pub smoke_count: u32,
    /// Crowd density in [0, 1].
    pub crowd_density: f64,
    pub location: String,
    /// Free-form label the service attached to its answer, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_label: Option<String>,
    /// Annotated JPEG returned by the service. Not serialized into reports.
    #[serde(skip)]
    pub annotated_image: Option<Vec<u8>>,
}

impl DetectionResult {
    pub fn new(fire_count: u32, smoke_count: u32, crowd_density: f64, location: &str) -> Self {
        Self {
            fire_count,
            smoke_count,
            crowd_density: clamp_density(crowd_density),
            location: location.to_string(),
            service_label: None,
            annotated_image: None,
        }
    }

    pub fn crowd_percent(&self) -> u32 {
        (self.crowd_density * 100.0).round() as u32
    }
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self::new(0, 0, 0.0, UNKNOWN_LOCATION)
    }
}

/// NaN and out-of-range densities collapse into [0, 1].
pub(crate) fn clamp_density(density: f64) -> f64 {
    if density.is_nan() {
        0.0
    } else {
        density.clamp(0.0, 1.0)
    }
}
