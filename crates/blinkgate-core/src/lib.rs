//! Blink-based liveness kernel.
//!
//! Consumes per-frame facial landmarks from an external Face Mesh detector
//! and turns them into discrete blink events that gate a face verification
//! request. Everything here is synchronous and allocation-light so it can run
//! inside a frame callback; I/O belongs to the caller.

pub mod baseline;
pub mod blink;
pub mod capture;
pub mod config;
pub mod ear;
pub mod landmarks;
pub mod session;

pub use baseline::{BaselineCalibrator, Thresholds};
pub use blink::{BlinkMachine, BlinkPhase, CompletedBlink};
pub use capture::{
    format_capture_timestamp, CaptureCoordinator, CaptureDecision, CaptureTicket,
    BLINK_INDICATOR, DEFAULT_COOLDOWN,
};
pub use config::{DetectorConfig, FaceLossPolicy};
pub use ear::{eye_aspect_ratio, EarSample, DEGENERATE_EAR};
pub use landmarks::{EyeKeyPoints, EyePair, GeometryError, Point};
pub use session::{tick, BlinkEvent, DetectionState, Frame, FrameOutcome};
