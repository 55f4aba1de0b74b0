//! Area-averaging downscale.
//!
//! Each destination sample is the area-weighted mean of the source samples its
//! footprint covers (a box filter). With an integer ratio every output is the
//! plain mean of `ratio` inputs; otherwise boundary inputs contribute the
//! fraction of them that falls inside the footprint.
//!
//! Size policy: a strip of length `L` shrunk by factor `k` becomes `max(1, L / k)`.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, RgbImage};

use crate::strip::Strip;

/// Shrink a strip's orthogonal axis by an integer factor. Factors <= 1 return
/// the strip unchanged.
pub fn downscale_strip(strip: Strip, factor: u32) -> Result<Strip> {
    if factor <= 1 {
        return Ok(strip);
    }
    let dst_len = (strip.len() / factor as usize).max(1);
    if dst_len == strip.len() {
        return Ok(strip);
    }

    let channels = strip.channels();
    let weights = area_weights(strip.len(), dst_len);
    let mut data = Vec::with_capacity(dst_len * channels * strip.extent());
    for line in strip.lines() {
        resample_line(line, channels, &weights, &mut data);
    }
    Strip::new(strip.axis(), dst_len, strip.extent(), channels, data)
}

/// Resample one interleaved line of `channels`-sample pixels to `dst_len` pixels.
pub fn area_resample(src: &[u8], channels: usize, dst_len: usize) -> Vec<u8> {
    let src_len = src.len() / channels.max(1);
    let mut out = Vec::with_capacity(dst_len * channels);
    if src_len == 0 || dst_len == 0 {
        return out;
    }
    resample_line(src, channels, &area_weights(src_len, dst_len), &mut out);
    out
}

/// Area-downscale a whole image to `dst_width` x `dst_height`.
///
/// Only 8-bit luma and RGB are kept as-is; other layouts are converted to RGB.
pub fn area_downscale_image(
    image: &DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> Result<DynamicImage> {
    let dst_width = dst_width.max(1);
    let dst_height = dst_height.max(1);
    match image {
        DynamicImage::ImageLuma8(img) => {
            let data = downscale_plane(
                img.as_raw(),
                (img.width(), img.height()),
                1,
                (dst_width, dst_height),
            );
            GrayImage::from_raw(dst_width, dst_height, data)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| anyhow!("downscaled luma buffer has wrong size"))
        }
        DynamicImage::ImageRgb8(img) => {
            let data = downscale_plane(
                img.as_raw(),
                (img.width(), img.height()),
                3,
                (dst_width, dst_height),
            );
            RgbImage::from_raw(dst_width, dst_height, data)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| anyhow!("downscaled rgb buffer has wrong size"))
        }
        other => {
            let rgb = DynamicImage::ImageRgb8(other.to_rgb8());
            area_downscale_image(&rgb, dst_width, dst_height)
        }
    }
}

/// Per destination index, the covered source indices and their normalized weights.
fn area_weights(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f64)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|i| {
            let start = i as f64 * scale;
            let end = ((i + 1) as f64 * scale).min(src_len as f64);
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len);
            (first..last)
                .filter_map(|j| {
                    let covered = end.min((j + 1) as f64) - start.max(j as f64);
                    (covered > 1e-9).then_some((j, covered / scale))
                })
                .collect()
        })
        .collect()
}

fn resample_line(src: &[u8], channels: usize, weights: &[Vec<(usize, f64)>], out: &mut Vec<u8>) {
    for taps in weights {
        for c in 0..channels {
            let acc: f64 = taps
                .iter()
                .map(|&(j, w)| w * f64::from(src[j * channels + c]))
                .sum();
            out.push(to_u8(acc));
        }
    }
}

fn downscale_plane(
    src: &[u8],
    (width, height): (u32, u32),
    channels: usize,
    (dst_width, dst_height): (u32, u32),
) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    let (dst_width, dst_height) = (dst_width as usize, dst_height as usize);
    if width == 0 || height == 0 {
        return vec![0; dst_width * dst_height * channels];
    }
    let x_weights = area_weights(width, dst_width);
    let y_weights = area_weights(height, dst_height);
    let row_stride = width * channels;

    let mut out = Vec::with_capacity(dst_width * dst_height * channels);
    let mut acc = vec![0f64; dst_width * channels];
    for y_taps in &y_weights {
        acc.iter_mut().for_each(|v| *v = 0.0);
        for &(sy, wy) in y_taps {
            let row = &src[sy * row_stride..(sy + 1) * row_stride];
            for (dx, x_taps) in x_weights.iter().enumerate() {
                for &(sx, wx) in x_taps {
                    let w = wy * wx;
                    for c in 0..channels {
                        acc[dx * channels + c] += w * f64::from(row[sx * channels + c]);
                    }
                }
            }
        }
        out.extend(acc.iter().map(|&v| to_u8(v)));
    }
    out
}

fn to_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
