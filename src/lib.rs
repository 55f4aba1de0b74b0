//! Line-scan camera emulation.
//!
//! A fixed one-pixel line (or a narrow band around it) is sampled from every
//! incoming webcam frame, and successive samples are laid side by side into a
//! growing slit-scan image.
//!
//! # Pipeline
//!
//! Each capture tick runs to completion before the next one starts:
//!
//! 1. decode the frame (`frame`)
//! 2. rotate by a quarter-turn multiple and convert to color or grayscale
//! 3. average the configured band into a one-line strip (`strip`)
//! 4. optionally shrink the strip's long axis by an integer factor (`resize`)
//! 5. append the strip to the accumulation canvas (`canvas`)
//!
//! `session` ties the steps together and owns the lifecycle; `export` turns the
//! canvas into PNG, PDF or a size-clamped preview; `api` serves the whole thing
//! over HTTP.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames, rotation, color conversion
//! - `strip`: frame-to-strip reduction
//! - `resize`: area-averaging downscale
//! - `canvas`: strip accumulation
//! - `session`: capture parameters and the session state machine
//! - `export`: PNG/PDF encoding and preview rendering
//! - `config`: process configuration (file + environment)
//! - `api`: HTTP control surface

pub mod api;
pub mod canvas;
pub mod config;
pub mod export;
pub mod frame;
pub mod resize;
pub mod session;
pub mod strip;

pub use canvas::AccumulationCanvas;
pub use export::{encode_pdf, encode_png, render_preview, PreviewBounds};
pub use frame::{decode_data_url, Frame};
pub use resize::{area_downscale_image, area_resample, downscale_strip};
pub use session::{
    CaptureParams, Rotation, ScanAxis, Session, SessionConfig, SessionState, SharedSession,
    TickError, TickOutcome,
};
pub use strip::{band_bounds, extract_strip, Strip};
