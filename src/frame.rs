//! Encoded still frames.
//!
//! Frame sources hand the scheduler an `EncodedFrame`: a single JPEG still
//! taken from the current state of a live stream. The scheduler never decodes
//! pixels itself; the bytes travel as-is to the detection service.

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use std::time::SystemTime;

use image::{ImageFormat, ImageReader, RgbImage};

/// Upper bound on a single encoded still accepted from any source.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Largest width or height accepted for frames built from raw pixels.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// A single encoded still image.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time.
    pub captured_at: SystemTime,
}

impl EncodedFrame {
    /// Wrap JPEG bytes, reading the dimensions from the image header.
    pub fn from_jpeg(jpeg: Vec<u8>) -> Result<Self> {
        if jpeg.is_empty() {
            return Err(anyhow!("empty jpeg frame"));
        }
        if jpeg.len() > MAX_FRAME_BYTES {
            return Err(anyhow!(
                "jpeg frame exceeds {} bytes ({} bytes)",
                MAX_FRAME_BYTES,
                jpeg.len()
            ));
        }
        let (width, height) = ImageReader::with_format(Cursor::new(&jpeg), ImageFormat::Jpeg)
            .into_dimensions()
            .context("read jpeg header")?;
        Ok(Self {
            jpeg,
            width,
            height,
            captured_at: SystemTime::now(),
        })
    }

    /// Encode an RGB buffer as a JPEG still.
    pub fn encode_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("rgb buffer does not match {}x{}", width, height))?;
        let mut jpeg = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .context("encode jpeg frame")?;
        Ok(Self {
            jpeg,
            width,
            height,
            captured_at: SystemTime::now(),
        })
    }

    pub fn as_jpeg(&self) -> &[u8] {
        &self.jpeg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_rgb_and_reads_back_dimensions() {
        let pixels = vec![128u8; 16 * 8 * 3];
        let frame = EncodedFrame::encode_rgb(pixels, 16, 8).expect("encode");
        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert!(!frame.as_jpeg().is_empty());

        let reread = EncodedFrame::from_jpeg(frame.as_jpeg().to_vec()).expect("decode");
        assert_eq!((reread.width, reread.height), (16, 8));
    }

    #[test]
    fn dimensions_come_from_the_header_alone() {
        let frame = EncodedFrame::encode_rgb(vec![64u8; 24 * 10 * 3], 24, 10).expect("encode");
        let jpeg = frame.as_jpeg();
        let sos = jpeg
            .windows(2)
            .position(|marker| marker == [0xFF, 0xDA])
            .expect("start of scan");
        let segment = u16::from_be_bytes([jpeg[sos + 2], jpeg[sos + 3]]) as usize;
        // Headers only, no entropy-coded scan data.
        let headers = jpeg[..sos + 2 + segment].to_vec();

        let parsed = EncodedFrame::from_jpeg(headers).expect("header read");
        assert_eq!((parsed.width, parsed.height), (24, 10));
    }

    #[test]
    fn rejects_mismatched_rgb_buffer() {
        assert!(EncodedFrame::encode_rgb(vec![0u8; 10], 16, 8).is_err());
    }

    #[test]
    fn rejects_non_jpeg_bytes() {
        assert!(EncodedFrame::from_jpeg(Vec::new()).is_err());
        assert!(EncodedFrame::from_jpeg(b"not a jpeg".to_vec()).is_err());
    }
}
