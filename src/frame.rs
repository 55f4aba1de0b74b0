//! Decoded capture frames.
//!
//! A `Frame` is one decoded camera tick: a row-major pixel grid that is either
//! single-channel (grayscale) or three-channel RGB. Frames are produced once per
//! capture tick, reduced to a strip and then dropped; nothing in this crate keeps
//! a frame alive past the tick that produced it.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{imageops, DynamicImage, GrayImage, RgbImage};

use crate::session::Rotation;

/// Upper bound on encoded frame payloads accepted by `Frame::decode`.
pub const MAX_ENCODED_FRAME_BYTES: usize = 16 * 1024 * 1024;

// ----------------------------------------------------------------------------
// Frame: decoded pixel grid
// ----------------------------------------------------------------------------

/// One decoded capture frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Frame {
    /// Decode an encoded still (JPEG or PNG) into an RGB frame.
    ///
    /// Camera payloads are always decoded to three channels; grayscale capture
    /// converts afterwards via `into_color_mode`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("empty frame payload"));
        }
        if bytes.len() > MAX_ENCODED_FRAME_BYTES {
            return Err(anyhow!(
                "frame payload too large: {} bytes (limit {})",
                bytes.len(),
                MAX_ENCODED_FRAME_BYTES
            ));
        }
        let image = image::load_from_memory(bytes).context("decode frame")?;
        Ok(Self::Rgb(image.into_rgb8()))
    }

    /// Build a frame from interleaved raw pixels (1 or 3 channels).
    pub fn from_raw(width: u32, height: u32, channels: usize, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(channels))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        match channels {
            1 => GrayImage::from_raw(width, height, pixels)
                .map(Self::Gray)
                .ok_or_else(|| anyhow!("invalid grayscale frame buffer")),
            3 => RgbImage::from_raw(width, height, pixels)
                .map(Self::Rgb)
                .ok_or_else(|| anyhow!("invalid rgb frame buffer")),
            other => Err(anyhow!("unsupported channel count {}", other)),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Rgb(img) => img.height(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Gray(_) => 1,
            Self::Rgb(_) => 3,
        }
    }

    /// Interleaved, row-major pixel bytes.
    pub fn as_raw(&self) -> &[u8] {
        match self {
            Self::Gray(img) => img.as_raw(),
            Self::Rgb(img) => img.as_raw(),
        }
    }

    /// Rotate clockwise by a quarter-turn multiple. 90 and 270 swap width and height.
    pub fn rotated(self, rotation: Rotation) -> Self {
        match (self, rotation) {
            (frame, Rotation::Deg0) => frame,
            (Self::Gray(img), Rotation::Deg90) => Self::Gray(imageops::rotate90(&img)),
            (Self::Gray(img), Rotation::Deg180) => Self::Gray(imageops::rotate180(&img)),
            (Self::Gray(img), Rotation::Deg270) => Self::Gray(imageops::rotate270(&img)),
            (Self::Rgb(img), Rotation::Deg90) => Self::Rgb(imageops::rotate90(&img)),
            (Self::Rgb(img), Rotation::Deg180) => Self::Rgb(imageops::rotate180(&img)),
            (Self::Rgb(img), Rotation::Deg270) => Self::Rgb(imageops::rotate270(&img)),
        }
    }

    /// Convert to three channels when `color` is set, to luma otherwise.
    pub fn into_color_mode(self, color: bool) -> Self {
        match (self, color) {
            (frame @ Self::Rgb(_), true) | (frame @ Self::Gray(_), false) => frame,
            (Self::Rgb(img), false) => Self::Gray(DynamicImage::ImageRgb8(img).into_luma8()),
            (Self::Gray(img), true) => Self::Rgb(DynamicImage::ImageLuma8(img).into_rgb8()),
        }
    }
}

/// Payload bytes of a `data:<mime>;base64,<payload>` URL, as browsers produce
/// with `canvas.toDataURL`. A bare base64 string is accepted as well.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let payload = match data_url.split_once(',') {
        Some((header, payload)) => {
            if !header.ends_with(";base64") {
                return Err(anyhow!("data url '{}' is not base64-encoded", header));
            }
            payload
        }
        None => data_url,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(anyhow!("empty frame payload"));
    }
    STANDARD
        .decode(payload)
        .context("decode base64 frame payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{ImageFormat, Luma, Rgb};
    use std::io::Cursor;

    #[test]
    fn from_raw_validates_length() {
        assert!(Frame::from_raw(2, 2, 3, vec![0u8; 11]).is_err());
        assert!(Frame::from_raw(2, 2, 2, vec![0u8; 8]).is_err());
        let frame = Frame::from_raw(2, 2, 1, vec![7u8; 4]).unwrap();
        assert_eq!(frame.channels(), 1);
        assert_eq!(frame.as_raw(), &[7u8; 4]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Frame::decode(b"").is_err());
        assert!(Frame::decode(b"definitely not an image").is_err());
    }

    #[test]
    fn decode_png_yields_rgb() -> Result<()> {
        let img = GrayImage::from_pixel(4, 3, Luma([200u8]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)?;

        let frame = Frame::decode(buf.get_ref())?;
        assert_eq!(frame.channels(), 3);
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert!(frame.as_raw().iter().all(|&v| v == 200));
        Ok(())
    }

    #[test]
    fn data_url_payload_decodes_to_frame() -> Result<()> {
        let img = RgbImage::from_pixel(8, 8, Rgb([10u8, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)?;
        let encoded = STANDARD.encode(buf.get_ref());

        let bytes = decode_data_url(&format!("data:image/png;base64,{encoded}"))?;
        assert_eq!(&bytes, buf.get_ref());
        let frame = Frame::decode(&bytes)?;
        assert_eq!((frame.width(), frame.height()), (8, 8));

        assert_eq!(decode_data_url(&encoded)?, bytes);
        Ok(())
    }

    #[test]
    fn data_url_rejects_bad_payloads() {
        assert!(decode_data_url("data:image/jpeg;base64,").is_err());
        assert!(decode_data_url("data:image/jpeg;base64,@@@not base64@@@").is_err());
        assert!(decode_data_url("data:text/plain,hello").is_err());
    }

    #[test]
    fn rotation_swaps_dimensions_clockwise() {
        let mut img = GrayImage::new(3, 2);
        img.put_pixel(0, 0, Luma([9u8]));
        let frame = Frame::Gray(img);

        let rotated = frame.clone().rotated(Rotation::Deg90);
        assert_eq!((rotated.width(), rotated.height()), (2, 3));
        // top-left lands at top-right after a clockwise quarter turn
        if let Frame::Gray(img) = &rotated {
            assert_eq!(img.get_pixel(1, 0)[0], 9);
        }

        let half = frame.clone().rotated(Rotation::Deg180);
        assert_eq!((half.width(), half.height()), (3, 2));
        assert_eq!(frame.clone().rotated(Rotation::Deg0), frame);
    }

    #[test]
    fn color_mode_conversion() {
        let rgb = Frame::Rgb(RgbImage::from_pixel(2, 2, Rgb([50u8, 50, 50])));
        let gray = rgb.into_color_mode(false);
        assert_eq!(gray.channels(), 1);
        assert!(gray.as_raw().iter().all(|&v| v == 50));

        let back = gray.into_color_mode(true);
        assert_eq!(back.channels(), 3);
        assert_eq!(back.as_raw().len(), 12);
    }
}
