//! Capture session: parameters, lifecycle and the per-tick pipeline.
//!
//! A `Session` owns the active `SessionConfig` and the `AccumulationCanvas`.
//! Every capture tick runs to completion inside `process_frame`:
//! rotate -> color mode -> extract strip -> downscale -> append.
//!
//! State machine:
//!
//! | from                 | operation       | to         | canvas                      |
//! |----------------------|-----------------|------------|-----------------------------|
//! | any                  | `configure`     | Configured | cleared                     |
//! | Idle / Configured    | `process_frame` | Active     | cleared, then strip appended|
//! | Active               | `process_frame` | Active     | strip appended              |
//! | Active / Configured  | `stop`          | Configured | kept                        |
//! | any                  | `reset`         | unchanged  | cleared                     |
//!
//! A tick that arrives while the session is not active restarts the canvas
//! before appending, so a client that lost track of the server state can never
//! stitch strips from two different runs together.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::canvas::AccumulationCanvas;
use crate::frame::Frame;
use crate::resize::downscale_strip;
use crate::strip::extract_strip;

pub const MIN_THICKNESS: u32 = 1;
pub const MAX_THICKNESS: u32 = 50;
pub const MIN_DOWNSCALE: u32 = 1;
pub const MAX_DOWNSCALE: u32 = 8;

const DEFAULT_POSITION: f64 = 0.5;
const DEFAULT_THICKNESS: i64 = 3;

// ----------------------------------------------------------------------------
// Scan axis and rotation
// ----------------------------------------------------------------------------

/// Which line is sampled from each frame.
///
/// `Vertical` samples a column and grows the canvas left-to-right;
/// `Horizontal` samples a row and grows it top-to-bottom.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanAxis {
    #[default]
    Vertical,
    Horizontal,
}

impl ScanAxis {
    /// Lenient parse; anything that is not "horizontal" scans vertically.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("horizontal") {
            Self::Horizontal
        } else {
            Self::Vertical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vertical => "vertical",
            Self::Horizontal => "horizontal",
        }
    }
}

/// Clockwise frame rotation applied before extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Snap an arbitrary angle to the nearest quarter turn.
    pub fn from_degrees(degrees: i64) -> Self {
        let normalized = degrees.rem_euclid(360);
        match ((normalized + 45) / 90) % 4 {
            1 => Self::Deg90,
            2 => Self::Deg180,
            3 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

// ----------------------------------------------------------------------------
// CaptureParams: raw request record
// ----------------------------------------------------------------------------

/// Unvalidated capture parameters as a client sends them.
///
/// Field names follow the control surface (`mode`, `pos`, `stripe`, `down`,
/// `rotate`, `color`). Nothing here is range-checked; `SessionConfig::from_params`
/// clamps every field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    pub mode: String,
    pub pos: f64,
    pub stripe: i64,
    pub down: i64,
    pub rotate: i64,
    #[serde(deserialize_with = "deserialize_flag")]
    pub color: bool,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            mode: ScanAxis::Vertical.as_str().to_string(),
            pos: DEFAULT_POSITION,
            stripe: DEFAULT_THICKNESS,
            down: 1,
            rotate: 0,
            color: true,
        }
    }
}

/// Accepts `true`/`false` as well as numeric `1`/`0` flags.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
        Flag::Float(value) => value != 0.0,
    })
}

// ----------------------------------------------------------------------------
// SessionConfig: accepted, clamped parameters
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub axis: ScanAxis,
    /// Normalized line offset along the sampled axis, in [0, 1].
    pub position: f64,
    /// Band width in source pixels, in [1, 50].
    pub thickness: u32,
    pub rotation: Rotation,
    /// Integer shrink factor for the strip's long axis, in [1, 8].
    pub downscale: u32,
    pub color: bool,
}

impl SessionConfig {
    /// Accept raw parameters, clamping each field into its valid domain.
    pub fn from_params(params: &CaptureParams) -> Self {
        let position = if params.pos.is_nan() {
            DEFAULT_POSITION
        } else {
            params.pos.clamp(0.0, 1.0)
        };
        Self {
            axis: ScanAxis::parse(&params.mode),
            position,
            thickness: clamp_to_u32(params.stripe, MIN_THICKNESS, MAX_THICKNESS),
            rotation: Rotation::from_degrees(params.rotate),
            downscale: clamp_to_u32(params.down, MIN_DOWNSCALE, MAX_DOWNSCALE),
            color: params.color,
        }
    }

    /// The accepted values in request form.
    pub fn to_params(&self) -> CaptureParams {
        CaptureParams {
            mode: self.axis.as_str().to_string(),
            pos: self.position,
            stripe: i64::from(self.thickness),
            down: i64::from(self.downscale),
            rotate: i64::from(self.rotation.degrees()),
            color: self.color,
        }
    }

    pub fn channels(&self) -> usize {
        if self.color {
            3
        } else {
            1
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_params(&CaptureParams::default())
    }
}

fn clamp_to_u32(value: i64, min: u32, max: u32) -> u32 {
    value.clamp(i64::from(min), i64::from(max)) as u32
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing configured since process start.
    Idle,
    /// Parameters accepted; no tick processed since then (or stopped).
    Configured,
    /// At least one tick appended since the last configure/stop.
    Active,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::Active => "active",
        }
    }
}

/// Why a capture tick did not count.
#[derive(Debug)]
pub enum TickError {
    /// The frame could not be reduced to a strip. The session is untouched.
    Dropped(anyhow::Error),
    /// The canvas was found inconsistent and has been reset.
    CanvasReset(anyhow::Error),
}

impl TickError {
    fn dropped(err: anyhow::Error) -> Self {
        log::warn!("capture tick dropped: {:#}", err);
        Self::Dropped(err)
    }
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped(err) => write!(f, "capture tick dropped: {:#}", err),
            Self::CanvasReset(err) => write!(f, "canvas reset after failed append: {:#}", err),
        }
    }
}

impl std::error::Error for TickError {}

/// Result of one processed capture tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// Samples appended to the canvas (strip pixels times channels).
    pub appended_pixels: usize,
}

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    canvas: AccumulationCanvas,
    ticks: u64,
}

/// Process-wide session guarded by a single mutex (single-writer).
pub type SharedSession = Arc<Mutex<Session>>;

impl Session {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            state: SessionState::Idle,
            canvas: AccumulationCanvas::new(),
            ticks: 0,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn canvas(&self) -> &AccumulationCanvas {
        &self.canvas
    }

    /// Ticks appended since process start.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Accept new parameters and start from an empty canvas.
    pub fn configure(&mut self, params: &CaptureParams) -> &SessionConfig {
        self.config = SessionConfig::from_params(params);
        self.canvas.reset();
        self.state = SessionState::Configured;
        log::info!(
            "session configured: mode={} pos={:.3} stripe={} down={} rotate={} color={}",
            self.config.axis.as_str(),
            self.config.position,
            self.config.thickness,
            self.config.downscale,
            self.config.rotation.degrees(),
            self.config.color
        );
        &self.config
    }

    /// Decode an encoded frame and process it. A payload that fails to decode
    /// leaves the session untouched.
    pub fn process_encoded(
        &mut self,
        bytes: &[u8],
    ) -> std::result::Result<TickOutcome, TickError> {
        let frame = Frame::decode(bytes).map_err(TickError::dropped)?;
        self.process_frame(frame)
    }

    /// Reduce one frame to a strip and append it to the canvas.
    pub fn process_frame(
        &mut self,
        frame: Frame,
    ) -> std::result::Result<TickOutcome, TickError> {
        let cfg = &self.config;
        let frame = frame.rotated(cfg.rotation).into_color_mode(cfg.color);
        let strip = extract_strip(&frame, cfg).map_err(TickError::dropped)?;
        let strip = downscale_strip(strip, cfg.downscale).map_err(TickError::dropped)?;

        if self.state != SessionState::Active {
            if !self.canvas.is_empty() {
                log::info!(
                    "tick arrived while session inactive; restarting canvas ({} lines discarded)",
                    self.canvas.scan_len()
                );
            }
            self.canvas.reset();
            self.state = SessionState::Active;
        }

        let orthogonal = match cfg.axis {
            ScanAxis::Vertical => frame.height() as usize,
            ScanAxis::Horizontal => frame.width() as usize,
        };
        let orthogonal = (orthogonal / cfg.downscale as usize).max(1);
        self.canvas.ensure_initialized(orthogonal, cfg.color, cfg.axis);

        match self.canvas.append(&strip) {
            Ok(appended_pixels) => {
                self.ticks += 1;
                log::debug!(
                    "tick {}: appended {} samples, canvas scan length {}",
                    self.ticks,
                    appended_pixels,
                    self.canvas.scan_len()
                );
                Ok(TickOutcome { appended_pixels })
            }
            Err(err) => {
                log::error!("canvas append failed, resetting session canvas: {:#}", err);
                self.canvas.reset();
                Err(TickError::CanvasReset(err))
            }
        }
    }

    /// Stop accepting ticks as part of the current run. The canvas is kept.
    pub fn stop(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Configured;
        }
        log::info!(
            "session stopped with {} accumulated lines",
            self.canvas.scan_len()
        );
    }

    /// Discard the canvas. The run state is unchanged.
    pub fn reset(&mut self) {
        self.canvas.reset();
        log::info!("session canvas reset");
    }

    /// Copy of the accumulated image, or `None` when nothing was captured.
    pub fn snapshot(&self) -> Option<DynamicImage> {
        self.canvas.snapshot()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a shared session, mapping mutex poisoning to an error.
pub fn lock_session(session: &SharedSession) -> Result<MutexGuard<'_, Session>> {
    session
        .lock()
        .map_err(|_| anyhow!("session lock poisoned"))
}
