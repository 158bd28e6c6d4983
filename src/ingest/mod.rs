//! Frame sources.
//!
//! This module provides the sources the scheduler captures stills from:
//! - Synthetic stream (`stub://name`, testing and demos)
//! - HTTP(S) camera snapshot endpoints
//! - Local still image files
//!
//! A source captures the *current* frame of a live stream; it never blocks
//! waiting for a new exposure. `capture()` returns `Ok(None)` when the source
//! is disconnected, which the scheduler treats as a skipped cycle.

pub mod file;
pub mod snapshot;
pub mod stub;

use anyhow::{anyhow, Result};
use url::Url;

use crate::frame::EncodedFrame;

pub use file::FileSource;
pub use snapshot::{SnapshotConfig, SnapshotSource};
pub use stub::{StubConfig, StubSource};

/// A live video source that can hand out its current frame as a still image.
pub trait FrameSource: Send {
    /// Source identifier used in logs.
    fn name(&self) -> &str;

    /// Activate the stream. Calling it on an active source is a no-op.
    fn connect(&mut self) -> Result<()>;

    /// Deactivate the stream. Idempotent.
    fn disconnect(&mut self);

    fn is_active(&self) -> bool;

    /// Capture the current frame, or `None` when no stream is active.
    fn capture(&mut self) -> Result<Option<EncodedFrame>>;
}

/// Open a frame source from a URL-ish string.
///
/// `stub://` selects the synthetic source, `http(s)://` a snapshot endpoint,
/// anything without a scheme is treated as a local file path.
pub fn open_source(location: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    if location.trim().is_empty() {
        return Err(anyhow!("frame source location is empty"));
    }
    if let Some(name) = location.strip_prefix("stub://") {
        return Ok(Box::new(StubSource::new(StubConfig {
            name: name.to_string(),
            width,
            height,
        })));
    }
    match Url::parse(location) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Box::new(SnapshotSource::new(SnapshotConfig {
                url: url.to_string(),
                ..SnapshotConfig::default()
            }))),
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| anyhow!("invalid file url '{}'", location))?;
                Ok(Box::new(FileSource::new(path)))
            }
            other => Err(anyhow!(
                "unsupported frame source scheme '{}'; expected stub, http(s) or a file path",
                other
            )),
        },
        Err(_) => Ok(Box::new(FileSource::new(location.into()))),
    }
}
