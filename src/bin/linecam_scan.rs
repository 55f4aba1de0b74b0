//! linecam_scan - build a slit-scan image from still frames on disk
//!
//! Each input image is treated as one capture tick, in file-name order.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use linecam::{encode_pdf, encode_png, CaptureParams, Session};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame files, or directories whose image files are read in name order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Scan mode: vertical (sample a column) or horizontal (sample a row).
    #[arg(long, default_value = "vertical")]
    mode: String,
    /// Normalized line position (0..1).
    #[arg(long, default_value_t = 0.5)]
    pos: f64,
    /// Band thickness in source pixels (1..50).
    #[arg(long, default_value_t = 3)]
    stripe: i64,
    /// Downscale factor for the strip's long axis (1..8).
    #[arg(long, default_value_t = 1)]
    down: i64,
    /// Clockwise rotation in degrees (0, 90, 180, 270).
    #[arg(long, default_value_t = 0)]
    rotate: i64,
    /// Accumulate grayscale instead of color.
    #[arg(long)]
    gray: bool,
    /// Output PNG path.
    #[arg(long)]
    png: Option<PathBuf>,
    /// Output PDF path.
    #[arg(long)]
    pdf: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.png.is_none() && args.pdf.is_none() {
        return Err(anyhow!("nothing to write: pass --png and/or --pdf"));
    }

    let frames = collect_frames(&args.inputs)?;
    let mut session = Session::new();
    session.configure(&CaptureParams {
        mode: args.mode.clone(),
        pos: args.pos,
        stripe: args.stripe,
        down: args.down,
        rotate: args.rotate,
        color: !args.gray,
    });

    let mut dropped = 0usize;
    for path in &frames {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        if session.process_encoded(&bytes).is_err() {
            log::warn!("skipping undecodable frame {}", path.display());
            dropped += 1;
        }
    }
    log::info!(
        "processed {} frames ({} dropped)",
        frames.len() - dropped,
        dropped
    );

    let image = session
        .snapshot()
        .ok_or_else(|| anyhow!("nothing to export yet: no frame could be decoded"))?;
    if let Some(path) = &args.png {
        fs::write(path, encode_png(&image)?)
            .with_context(|| format!("write {}", path.display()))?;
        log::info!("wrote {}", path.display());
    }
    if let Some(path) = &args.pdf {
        fs::write(path, encode_pdf(&image)?)
            .with_context(|| format!("write {}", path.display()))?;
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

fn collect_frames(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            entries.sort();
            frames.extend(entries);
        } else {
            frames.push(input.clone());
        }
    }
    if frames.is_empty() {
        return Err(anyhow!("no frame files found"));
    }
    Ok(frames)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png"
            )
        })
        .unwrap_or(false)
}
