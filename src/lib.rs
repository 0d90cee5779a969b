//! framebridge
//!
//! Moves depth + color frame pairs from a blocking camera SDK to a consumer
//! that must never block.
//!
//! # Architecture
//!
//! - A dedicated capture thread owns the `FrameSource` for the whole session.
//!   It throttles, acquires with a bounded wait, and pushes each `FramePair`
//!   into a lock-guarded handoff queue, then rings a coalescing doorbell.
//! - The consumer calls `CaptureSession::dispatch` on its own turn. Pending
//!   pairs are delivered to `on_frame` in capture order, followed by exactly
//!   one `on_complete` when the session ends.
//! - A `CaptureController` serializes start/stop and admits one session at a
//!   time.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `FramePair`, pixel layout invariants
//! - `options`: host-facing `CaptureOptions` and the validated `CaptureConfig`
//! - `ingest`: `FrameSource` trait and sources (synthetic, RealSense)
//! - `session`: controller, capture loop, handoff queue, delivery bridge
//! - `wire`: packed record format for frame pairs leaving the process
//! - `config`: daemon configuration (file + environment)

pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod options;
pub mod session;
pub mod wire;

pub use error::CaptureError;
pub use frame::{Frame, FramePair, StreamKind};
#[cfg(feature = "realsense")]
pub use ingest::RealSenseSource;
pub use ingest::{CameraSource, FrameSource, SyntheticConfig, SyntheticSource};
pub use options::{CaptureConfig, CaptureOptions};
pub use session::{
    Callbacks, CaptureController, CaptureSession, Dispatch, SessionSettings, SessionState,
    StatsSnapshot, StopOutcome, StopPolicy, DEFAULT_ACQUIRE_TIMEOUT,
};
