//! Capture error taxonomy.
//!
//! Every failure that crosses the `FrameSource` boundary is converted into one
//! of these kinds. Only `AcquisitionTimeout` is transient; the capture loop
//! retries it in place and it never reaches a completion callback.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// Invalid stream parameters, rejected before any frame is captured.
    Configuration(String),
    /// No frames arrived within the bounded wait.
    AcquisitionTimeout,
    /// Hardware or pipeline failure during an active session.
    Device(String),
    /// `start` called while another session owns the source.
    AlreadyRunning,
    /// Anything the source could not categorize.
    Unknown(String),
}

impl CaptureError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        CaptureError::Configuration(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        CaptureError::Device(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        CaptureError::Unknown(msg.into())
    }

    /// Transient errors are retried by the capture loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::AcquisitionTimeout)
    }

    /// Fatal errors end the session and are reported through `on_complete`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::Configuration(_) | CaptureError::Device(_) | CaptureError::Unknown(_)
        )
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            CaptureError::AcquisitionTimeout => write!(f, "timed out waiting for frames"),
            CaptureError::Device(msg) => write!(f, "device error: {msg}"),
            CaptureError::AlreadyRunning => write!(f, "a capture session is already running"),
            CaptureError::Unknown(msg) => write!(f, "unknown capture error: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}
