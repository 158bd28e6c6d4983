use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::detect::backend::DetectionClient;
use crate::detect::result::DetectionResult;
use crate::frame::EncodedFrame;

/// Scripted detection client for tests and offline demos.
///
/// Replays queued answers in order. Once the script runs dry it keeps
/// answering with the fallback result.
pub struct ScriptedDetector {
    script: VecDeque<Result<DetectionResult, String>>,
    fallback: DetectionResult,
    calls: Arc<AtomicU64>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: DetectionResult::default(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Demo script cycling through fire, crowd and quiet scenes at `location`.
    pub fn demo(location: &str) -> Self {
        Self::new()
            .then(DetectionResult::new(0, 0, 0.2, location))
            .then(DetectionResult::new(0, 0, 0.55, location))
            .then(DetectionResult::new(1, 2, 0.3, location))
            .then(DetectionResult::new(0, 1, 0.8, location))
            .with_fallback(DetectionResult::new(0, 0, 0.1, location))
    }

    pub fn then(mut self, result: DetectionResult) -> Self {
        self.script.push_back(Ok(result));
        self
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }

    pub fn with_fallback(mut self, fallback: DetectionResult) -> Self {
        self.fallback = fallback;
        self
    }

    /// Shared counter of `detect` calls, readable after the client is moved.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionClient for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&mut self, _frame: &EncodedFrame) -> Result<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_then_fallback() {
        let frame = EncodedFrame::encode_rgb(vec![0u8; 2 * 2 * 3], 2, 2).expect("encode");
        let mut detector = ScriptedDetector::new()
            .then(DetectionResult::new(1, 0, 0.0, "Lobby"))
            .then_fail("service unavailable")
            .with_fallback(DetectionResult::new(0, 0, 0.1, "Lobby"));
        let calls = detector.call_counter();

        assert_eq!(detector.detect(&frame).expect("first").fire_count, 1);
        assert!(detector.detect(&frame).is_err());
        let fallback = detector.detect(&frame).expect("fallback");
        assert_eq!(fallback.fire_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
