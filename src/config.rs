use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::export::{PreviewBounds, DEFAULT_PREVIEW_MAX_HEIGHT, DEFAULT_PREVIEW_MAX_WIDTH};
use crate::session::CaptureParams;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
struct LinecamConfigFile {
    api: Option<ApiConfigFile>,
    preview: Option<PreviewConfigFile>,
    capture: Option<CaptureParams>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    max_width: Option<u32>,
    max_height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LinecamConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    pub preview: PreviewBounds,
    /// Capture parameters used for fields a `/start` request leaves out.
    pub capture: CaptureParams,
}

impl LinecamConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LINECAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LinecamConfigFile) -> Self {
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let max_body_bytes = file
            .api
            .as_ref()
            .and_then(|api| api.max_body_bytes)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);
        let preview = PreviewBounds {
            max_width: file
                .preview
                .as_ref()
                .and_then(|preview| preview.max_width)
                .unwrap_or(DEFAULT_PREVIEW_MAX_WIDTH),
            max_height: file
                .preview
                .as_ref()
                .and_then(|preview| preview.max_height)
                .unwrap_or(DEFAULT_PREVIEW_MAX_HEIGHT),
        };
        Self {
            api_addr,
            max_body_bytes,
            preview,
            capture: file.capture.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("LINECAM_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(bytes) = std::env::var("LINECAM_MAX_BODY_BYTES") {
            self.max_body_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("LINECAM_MAX_BODY_BYTES must be an integer number of bytes"))?;
        }
        if let Ok(width) = std::env::var("LINECAM_PREVIEW_MAX_WIDTH") {
            self.preview.max_width = width
                .trim()
                .parse()
                .map_err(|_| anyhow!("LINECAM_PREVIEW_MAX_WIDTH must be an integer"))?;
        }
        if let Ok(height) = std::env::var("LINECAM_PREVIEW_MAX_HEIGHT") {
            self.preview.max_height = height
                .trim()
                .parse()
                .map_err(|_| anyhow!("LINECAM_PREVIEW_MAX_HEIGHT must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_body_bytes == 0 {
            return Err(anyhow!("api max_body_bytes must be greater than zero"));
        }
        if self.preview.max_width == 0 || self.preview.max_height == 0 {
            return Err(anyhow!("preview bounds must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for LinecamConfig {
    fn default() -> Self {
        Self::from_file(LinecamConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<LinecamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = LinecamConfig::default();
        assert_eq!(cfg.api_addr, DEFAULT_API_ADDR);
        assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(cfg.preview, PreviewBounds::default());
        assert_eq!(cfg.capture, CaptureParams::default());
    }

    #[test]
    fn partial_capture_section_keeps_other_defaults() -> Result<()> {
        let file: LinecamConfigFile =
            serde_json::from_str(r#"{"capture": {"mode": "horizontal", "color": 0}}"#)?;
        let cfg = LinecamConfig::from_file(file);
        assert_eq!(cfg.capture.mode, "horizontal");
        assert!(!cfg.capture.color);
        assert_eq!(cfg.capture.pos, CaptureParams::default().pos);
        Ok(())
    }

    #[test]
    fn zero_preview_bound_is_rejected() {
        let mut cfg = LinecamConfig::default();
        cfg.preview.max_height = 0;
        assert!(cfg.validate().is_err());
    }
}
