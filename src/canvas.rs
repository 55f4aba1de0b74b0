//! Strip accumulation canvas.
//!
//! The canvas is the only persistent artifact of a capture session. Its
//! orthogonal size and channel count are fixed by the first strip (or the first
//! `ensure_initialized` call); the scan axis grows by each strip's extent.
//!
//! Strips are stored in arrival order, one line after another. `snapshot`
//! lays them out as an image: columns left-to-right for vertical scans, rows
//! top-to-bottom for horizontal scans.
//!
//! A strip whose layout does not match the canvas replaces the canvas. This is
//! a lossy repair for mid-session reconfiguration, not an error.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, RgbImage};

use crate::session::ScanAxis;
use crate::strip::Strip;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CanvasLayout {
    axis: ScanAxis,
    orthogonal_len: usize,
    channels: usize,
}

impl CanvasLayout {
    fn line_bytes(&self) -> usize {
        self.orthogonal_len * self.channels
    }
}

#[derive(Debug, Default)]
pub struct AccumulationCanvas {
    layout: Option<CanvasLayout>,
    scan_len: usize,
    data: Vec<u8>,
}

impl AccumulationCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    /// True when no line has been appended.
    pub fn is_empty(&self) -> bool {
        self.scan_len == 0
    }

    /// Lines accumulated along the scan axis.
    pub fn scan_len(&self) -> usize {
        self.scan_len
    }

    pub fn orthogonal_len(&self) -> Option<usize> {
        self.layout.map(|layout| layout.orthogonal_len)
    }

    pub fn channels(&self) -> Option<usize> {
        self.layout.map(|layout| layout.channels)
    }

    pub fn axis(&self) -> Option<ScanAxis> {
        self.layout.map(|layout| layout.axis)
    }

    /// Size an empty canvas. No-op once the canvas has a layout.
    pub fn ensure_initialized(&mut self, orthogonal_len: usize, color: bool, axis: ScanAxis) {
        if self.layout.is_some() {
            return;
        }
        self.allocate(CanvasLayout {
            axis,
            orthogonal_len,
            channels: if color { 3 } else { 1 },
        });
    }

    /// Append a strip along the scan axis, returning the number of samples added.
    ///
    /// A strip whose orthogonal size, channel count or axis differs from the
    /// canvas discards everything accumulated so far and restarts from it.
    pub fn append(&mut self, strip: &Strip) -> Result<usize> {
        let wanted = CanvasLayout {
            axis: strip.axis(),
            orthogonal_len: strip.len(),
            channels: strip.channels(),
        };
        match self.layout {
            Some(layout) if layout == wanted => {}
            Some(layout) => {
                log::warn!(
                    "strip layout {}x{}ch ({}) does not match canvas {}x{}ch ({}); discarding {} lines",
                    wanted.orthogonal_len,
                    wanted.channels,
                    wanted.axis.as_str(),
                    layout.orthogonal_len,
                    layout.channels,
                    layout.axis.as_str(),
                    self.scan_len
                );
                self.allocate(wanted);
            }
            None => self.allocate(wanted),
        }

        let expected = self.scan_len * wanted.line_bytes();
        if self.data.len() != expected {
            return Err(anyhow!(
                "canvas buffer inconsistent: {} bytes for {} lines of {}",
                self.data.len(),
                self.scan_len,
                wanted.line_bytes()
            ));
        }

        self.data.extend_from_slice(strip.data());
        self.scan_len += strip.extent();
        Ok(strip.data().len())
    }

    /// Return to the uninitialized state.
    pub fn reset(&mut self) {
        self.layout = None;
        self.scan_len = 0;
        self.data = Vec::new();
    }

    /// Copy of the accumulated image; `None` if nothing has been appended.
    pub fn snapshot(&self) -> Option<DynamicImage> {
        let layout = self.layout?;
        if self.scan_len == 0 || layout.orthogonal_len == 0 {
            return None;
        }
        let (width, height, raw) = match layout.axis {
            ScanAxis::Horizontal => (layout.orthogonal_len, self.scan_len, self.data.clone()),
            ScanAxis::Vertical => (
                self.scan_len,
                layout.orthogonal_len,
                transpose_lines(&self.data, self.scan_len, layout),
            ),
        };
        let (width, height) = (u32::try_from(width).ok()?, u32::try_from(height).ok()?);
        match layout.channels {
            1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
            _ => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        }
    }

    #[cfg(test)]
    pub(crate) fn drop_last_sample(&mut self) {
        self.data.pop();
    }

    fn allocate(&mut self, layout: CanvasLayout) {
        self.layout = Some(layout);
        self.scan_len = 0;
        self.data.clear();
    }
}

/// Stored lines are columns for vertical scans; turn them into image rows.
fn transpose_lines(data: &[u8], scan_len: usize, layout: CanvasLayout) -> Vec<u8> {
    let ch = layout.channels;
    let line_bytes = layout.line_bytes();
    let mut out = vec![0u8; data.len()];
    for (x, column) in data.chunks_exact(line_bytes).enumerate().take(scan_len) {
        for y in 0..layout.orthogonal_len {
            let dst = (y * scan_len + x) * ch;
            out[dst..dst + ch].copy_from_slice(&column[y * ch..(y + 1) * ch]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: &[u8]) -> Strip {
        Strip::new(ScanAxis::Vertical, values.len(), 1, 1, values.to_vec()).unwrap()
    }

    fn row_rgb(len: usize, value: u8) -> Strip {
        Strip::new(ScanAxis::Horizontal, len, 1, 3, vec![value; len * 3]).unwrap()
    }

    #[test]
    fn new_canvas_snapshots_empty() {
        let mut canvas = AccumulationCanvas::new();
        assert!(canvas.snapshot().is_none());
        canvas.ensure_initialized(10, false, ScanAxis::Vertical);
        assert!(canvas.is_initialized());
        assert!(canvas.snapshot().is_none());
    }

    #[test]
    fn ensure_initialized_is_idempotent() {
        let mut canvas = AccumulationCanvas::new();
        canvas.ensure_initialized(10, false, ScanAxis::Vertical);
        canvas.ensure_initialized(20, true, ScanAxis::Horizontal);
        assert_eq!(canvas.orthogonal_len(), Some(10));
        assert_eq!(canvas.channels(), Some(1));
        assert_eq!(canvas.axis(), Some(ScanAxis::Vertical));
    }

    #[test]
    fn vertical_appends_grow_width() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        canvas.ensure_initialized(3, false, ScanAxis::Vertical);
        canvas.append(&column(&[1, 2, 3]))?;
        canvas.append(&column(&[4, 5, 6]))?;

        let image = canvas.snapshot().expect("two columns").to_luma8();
        assert_eq!(image.dimensions(), (2, 3));
        assert_eq!(image.as_raw(), &vec![1u8, 4, 2, 5, 3, 6]);
        Ok(())
    }

    #[test]
    fn horizontal_appends_grow_height() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        for value in [10, 20, 30, 40] {
            assert_eq!(canvas.append(&row_rgb(5, value))?, 15);
        }
        let image = canvas.snapshot().expect("four rows").to_rgb8();
        assert_eq!(image.dimensions(), (5, 4));
        assert_eq!(image.get_pixel(4, 2).0, [30, 30, 30]);
        Ok(())
    }

    #[test]
    fn thick_strip_grows_by_extent() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        canvas.append(&column(&[1, 2]))?;
        let thick = Strip::new(ScanAxis::Vertical, 2, 3, 1, vec![7; 6])?;
        canvas.append(&thick)?;
        assert_eq!(canvas.scan_len(), 4);
        Ok(())
    }

    #[test]
    fn orthogonal_mismatch_restarts_canvas() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        canvas.ensure_initialized(3, false, ScanAxis::Vertical);
        canvas.append(&column(&[1, 2, 3]))?;
        canvas.append(&column(&[1, 2, 3]))?;
        canvas.append(&column(&[9, 9]))?;

        assert_eq!(canvas.scan_len(), 1);
        assert_eq!(canvas.orthogonal_len(), Some(2));
        let image = canvas.snapshot().expect("one column").to_luma8();
        assert_eq!(image.as_raw(), &vec![9u8, 9]);
        Ok(())
    }

    #[test]
    fn channel_mismatch_restarts_canvas() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        for _ in 0..3 {
            canvas.append(&row_rgb(4, 100))?;
        }
        let gray = Strip::new(ScanAxis::Horizontal, 4, 1, 1, vec![5; 4])?;
        canvas.append(&gray)?;
        assert_eq!(canvas.scan_len(), 1);
        assert_eq!(canvas.channels(), Some(1));
        Ok(())
    }

    #[test]
    fn inconsistent_buffer_is_an_error() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        canvas.append(&column(&[1, 2, 3]))?;
        canvas.drop_last_sample();
        assert!(canvas.append(&column(&[4, 5, 6])).is_err());
        Ok(())
    }

    #[test]
    fn reset_returns_to_uninitialized() -> Result<()> {
        let mut canvas = AccumulationCanvas::new();
        canvas.append(&column(&[1, 2, 3]))?;
        canvas.reset();
        assert!(!canvas.is_initialized());
        assert!(canvas.snapshot().is_none());
        Ok(())
    }
}
