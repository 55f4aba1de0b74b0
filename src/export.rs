//! Export and preview of the accumulated image.
//!
//! - PNG: direct encode of the canvas, color or grayscale.
//! - PDF: canvas converted to grayscale, JPEG-compressed (quality 95) and
//!   placed on a single A4 page, scaled to fit and centered.
//! - Preview: canvas clamped to a maximum size by area downscale. Presentation
//!   only; exports always use the full-resolution canvas.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, Luma};
use std::io::{Cursor, Write};

use crate::resize::area_downscale_image;

pub const PDF_JPEG_QUALITY: u8 = 95;
pub const DEFAULT_PREVIEW_MAX_WIDTH: u32 = 4000;
pub const DEFAULT_PREVIEW_MAX_HEIGHT: u32 = 2000;

const PLACEHOLDER_WIDTH: u32 = 640;
const PLACEHOLDER_HEIGHT: u32 = 120;
const A4_WIDTH_MM: f64 = 210.0;
const A4_HEIGHT_MM: f64 = 297.0;

/// Largest preview image served to a viewer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreviewBounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for PreviewBounds {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_PREVIEW_MAX_WIDTH,
            max_height: DEFAULT_PREVIEW_MAX_HEIGHT,
        }
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .context("encode png")?;
    Ok(buf.into_inner())
}

/// Encode the image as a one-page A4 PDF (grayscale JPEG).
pub fn encode_pdf(image: &DynamicImage) -> Result<Vec<u8>> {
    let gray = image.to_luma8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, PDF_JPEG_QUALITY)
        .encode_image(&gray)
        .context("encode pdf jpeg")?;
    write_single_image_pdf(&jpeg, gray.width(), gray.height())
}

/// Image for the live preview: clamped to `bounds`, or a blank placeholder
/// when nothing has been captured.
pub fn render_preview(
    snapshot: Option<DynamicImage>,
    bounds: PreviewBounds,
) -> Result<DynamicImage> {
    let Some(image) = snapshot else {
        return Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            PLACEHOLDER_WIDTH,
            PLACEHOLDER_HEIGHT,
            Luma([255u8]),
        )));
    };
    let (width, height) = image.dimensions();
    let scale = (f64::from(bounds.max_width) / f64::from(width.max(1)))
        .min(f64::from(bounds.max_height) / f64::from(height.max(1)))
        .min(1.0);
    if scale >= 1.0 {
        return Ok(image);
    }
    let dst_width = ((f64::from(width) * scale) as u32).max(1);
    let dst_height = ((f64::from(height) * scale) as u32).max(1);
    area_downscale_image(&image, dst_width, dst_height)
}

/// Download name for an export, e.g. `linecam_20240131_235959.png`.
pub fn export_file_name(extension: &str) -> String {
    format!(
        "linecam_{}.{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}

fn mm_to_pt(mm: f64) -> f64 {
    mm * 72.0 / 25.4
}

/// Minimal PDF 1.4 writer: one page, one DCT-encoded grayscale image.
fn write_single_image_pdf(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let page_w = mm_to_pt(A4_WIDTH_MM);
    let page_h = mm_to_pt(A4_HEIGHT_MM);
    let scale = (page_w / f64::from(width.max(1))).min(page_h / f64::from(height.max(1)));
    let draw_w = f64::from(width) * scale;
    let draw_h = f64::from(height) * scale;
    let x = (page_w - draw_w) / 2.0;
    let y = (page_h - draw_h) / 2.0;
    let content = format!("q\n{draw_w:.4} 0 0 {draw_h:.4} {x:.4} {y:.4} cm\n/Im0 Do\nQ\n");

    let mut out: Vec<u8> = Vec::with_capacity(jpeg.len() + 1024);
    let mut offsets = Vec::with_capacity(5);
    out.write_all(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n")?;

    offsets.push(out.len());
    out.write_all(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n")?;

    offsets.push(out.len());
    out.write_all(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n")?;

    offsets.push(out.len());
    write!(
        out,
        "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_w:.4} {page_h:.4}] \
         /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>\nendobj\n"
    )?;

    offsets.push(out.len());
    write!(
        out,
        "4 0 obj\n<< /Type /XObject /Subtype /Image /Width {width} /Height {height} \
         /ColorSpace /DeviceGray /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
        jpeg.len()
    )?;
    out.write_all(jpeg)?;
    out.write_all(b"\nendstream\nendobj\n")?;

    offsets.push(out.len());
    write!(
        out,
        "5 0 obj\n<< /Length {} >>\nstream\n{content}endstream\nendobj\n",
        content.len()
    )?;

    let xref_at = out.len();
    write!(out, "xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1)?;
    for offset in &offsets {
        write!(out, "{offset:010} 00000 n \n")?;
    }
    write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        offsets.len() + 1
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn rgb_canvas(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10u8, 20, 30])))
    }

    #[test]
    fn png_round_trips_dimensions() -> Result<()> {
        let png = encode_png(&rgb_canvas(7, 3))?;
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png)?;
        assert_eq!(decoded.dimensions(), (7, 3));
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        Ok(())
    }

    #[test]
    fn pdf_embeds_grayscale_jpeg() -> Result<()> {
        let pdf = encode_pdf(&rgb_canvas(40, 10))?;
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("/Width 40 /Height 10"));
        assert!(text.contains("/ColorSpace /DeviceGray"));
        assert!(text.contains("/Filter /DCTDecode"));
        assert!(text.trim_end().ends_with("%%EOF"));
        // JPEG SOI marker inside the image stream
        assert!(pdf.windows(2).any(|w| w == [0xFF, 0xD8]));
        Ok(())
    }

    #[test]
    fn pdf_xref_offsets_point_at_objects() -> Result<()> {
        let pdf = encode_pdf(&rgb_canvas(8, 8))?;
        let marker = b"startxref\n";
        let start = pdf
            .windows(marker.len())
            .rposition(|w| w == marker)
            .expect("startxref")
            + marker.len();
        let tail = String::from_utf8(pdf[start..].to_vec())?;
        let xref_at: usize = tail.lines().next().unwrap_or("").parse()?;

        let table = String::from_utf8(pdf[xref_at..start].to_vec())?;
        assert!(table.starts_with("xref"));
        let entries: Vec<usize> = table
            .lines()
            .skip(3)
            .take(5)
            .map(|line| line[..10].parse().unwrap())
            .collect();
        assert_eq!(entries.len(), 5);
        for (i, offset) in entries.iter().enumerate() {
            let header = format!("{} 0 obj", i + 1);
            assert!(pdf[*offset..].starts_with(header.as_bytes()));
        }
        Ok(())
    }

    #[test]
    fn preview_placeholder_when_empty() -> Result<()> {
        let preview = render_preview(None, PreviewBounds::default())?;
        assert_eq!(preview.dimensions(), (640, 120));
        assert!(preview.to_luma8().as_raw().iter().all(|&v| v == 255));
        Ok(())
    }

    #[test]
    fn preview_clamps_large_canvas() -> Result<()> {
        let bounds = PreviewBounds {
            max_width: 50,
            max_height: 20,
        };
        let preview = render_preview(Some(rgb_canvas(200, 10)), bounds)?;
        assert_eq!(preview.dimensions(), (50, 2));
        assert_eq!(preview.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);

        let small = render_preview(Some(rgb_canvas(30, 10)), bounds)?;
        assert_eq!(small.dimensions(), (30, 10));
        Ok(())
    }

    #[test]
    fn export_names_carry_extension() {
        let name = export_file_name("pdf");
        assert!(name.starts_with("linecam_"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), "linecam_YYYYmmdd_HHMMSS.pdf".len());
    }
}
