//! Frame-to-strip reduction.
//!
//! A strip is one sampled line of a frame: a band of `thickness` source lines
//! centered on the configured position is averaged into a single line. Bands
//! near a frame edge are clipped, never wrapped or padded, so the averaging
//! window narrows there.

use anyhow::{anyhow, Result};
use std::ops::Range;

use crate::frame::Frame;
use crate::session::{ScanAxis, SessionConfig};

/// A reduced slice of one (or a few) frames.
///
/// Pixels are stored line by line along the scan axis: `extent` lines, each
/// `len * channels` interleaved samples long. `len` is the orthogonal size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Strip {
    axis: ScanAxis,
    len: usize,
    extent: usize,
    channels: usize,
    data: Vec<u8>,
}

impl Strip {
    pub fn new(
        axis: ScanAxis,
        len: usize,
        extent: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        if len == 0 || extent == 0 {
            return Err(anyhow!("strip must not be empty ({}x{})", len, extent));
        }
        if channels != 1 && channels != 3 {
            return Err(anyhow!("unsupported channel count {}", channels));
        }
        let expected = len * extent * channels;
        if data.len() != expected {
            return Err(anyhow!(
                "strip length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            axis,
            len,
            extent,
            channels,
            data,
        })
    }

    pub fn axis(&self) -> ScanAxis {
        self.axis
    }

    /// Size along the orthogonal axis.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Size along the scan axis (1 for a single extracted line).
    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.len * self.channels)
    }
}

/// Source lines averaged for a line at `position` (normalized) in a dimension of `len`.
pub fn band_bounds(len: usize, position: f64, thickness: u32) -> Range<usize> {
    if len == 0 {
        return 0..0;
    }
    let center = (position * len as f64).round().max(0.0) as usize;
    let center = center.min(len - 1);
    let half = (thickness.max(1) / 2) as usize;
    center.saturating_sub(half)..(center + half + 1).min(len)
}

/// Reduce a frame to a one-line strip along the configured axis.
///
/// The result keeps the frame's channel count; color conversion happens on the
/// frame beforehand. Averages are truncated to 8 bits.
pub fn extract_strip(frame: &Frame, config: &SessionConfig) -> Result<Strip> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot extract a strip from an empty {}x{} frame", width, height));
    }
    let channels = frame.channels();
    let pixels = frame.as_raw();
    let row_stride = width * channels;

    let data = match config.axis {
        ScanAxis::Vertical => {
            let band = band_bounds(width, config.position, config.thickness);
            let count = band.len() as u32;
            let mut column = Vec::with_capacity(height * channels);
            for row in pixels.chunks_exact(row_stride) {
                for c in 0..channels {
                    let sum: u32 = band.clone().map(|x| u32::from(row[x * channels + c])).sum();
                    column.push((sum / count) as u8);
                }
            }
            column
        }
        ScanAxis::Horizontal => {
            let band = band_bounds(height, config.position, config.thickness);
            let count = band.len() as u32;
            let mut sums = vec![0u32; row_stride];
            for row in pixels.chunks_exact(row_stride).skip(band.start).take(band.len()) {
                for (acc, &value) in sums.iter_mut().zip(row) {
                    *acc += u32::from(value);
                }
            }
            sums.into_iter().map(|sum| (sum / count) as u8).collect()
        }
    };

    let len = match config.axis {
        ScanAxis::Vertical => height,
        ScanAxis::Horizontal => width,
    };
    Strip::new(config.axis, len, 1, channels, data)
}
