//! Frame sources.
//!
//! A `FrameSource` is the boundary to the camera SDK. It supplies blocking,
//! bounded-wait acquisition of depth + color pairs:
//! - RealSense devices via librealsense2 (feature: realsense)
//! - Synthetic source (`stub://` URIs, testing)
//!
//! Sources convert every SDK failure into a tagged `CaptureError` at this
//! boundary. The capture loop owns its source exclusively for the whole
//! session; sources are never touched from the consumer side.

#[cfg(feature = "realsense")]
pub mod realsense;
pub mod synthetic;

#[cfg(feature = "realsense")]
pub use realsense::RealSenseSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

use std::time::Duration;

use crate::error::CaptureError;
use crate::frame::FramePair;
use crate::options::CaptureConfig;

/// Blocking frame acquisition for a configured depth + color stream.
pub trait FrameSource: Send {
    /// Human-readable identifier for logs.
    fn describe(&self) -> String;

    /// Configure both streams and start the device.
    ///
    /// A rejected stream profile must be reported as `CaptureError::Configuration`.
    fn start(&mut self, config: &CaptureConfig) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for the next pair.
    ///
    /// Returns `CaptureError::AcquisitionTimeout` if nothing arrived in time.
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, CaptureError>;

    /// Stop the device. Calling this more than once, or before `start`, is a no-op.
    fn stop(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        (**self).start(config)
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, CaptureError> {
        (**self).wait_for_frames(timeout)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// URI-selected camera source.
///
/// - `stub://<name>`: synthetic frames
/// - `realsense://` or `realsense://<serial>`: librealsense2 device (feature: realsense)
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "realsense")]
    RealSense(RealSenseSource),
}

impl CameraSource {
    pub fn from_uri(uri: &str) -> anyhow::Result<Self> {
        if let Some(name) = uri.strip_prefix("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(SyntheticConfig {
                    name: name.to_string(),
                    ..SyntheticConfig::default()
                })),
            });
        }
        if let Some(serial) = uri.strip_prefix("realsense://") {
            #[cfg(feature = "realsense")]
            {
                let serial = (!serial.is_empty()).then(|| serial.to_string());
                return Ok(Self {
                    backend: CameraBackend::RealSense(RealSenseSource::new(serial)),
                });
            }
            #[cfg(not(feature = "realsense"))]
            {
                let _ = serial;
                anyhow::bail!("realsense sources require the realsense feature");
            }
        }
        anyhow::bail!("unsupported source uri '{}' (expected stub:// or realsense://)", uri)
    }

    pub fn synthetic(config: SyntheticConfig) -> Self {
        Self {
            backend: CameraBackend::Synthetic(SyntheticSource::new(config)),
        }
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "realsense")]
            CameraBackend::RealSense(source) => source.describe(),
        }
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.start(config),
            #[cfg(feature = "realsense")]
            CameraBackend::RealSense(source) => source.start(config),
        }
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, CaptureError> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.wait_for_frames(timeout),
            #[cfg(feature = "realsense")]
            CameraBackend::RealSense(source) => source.wait_for_frames(timeout),
        }
    }

    fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.stop(),
            #[cfg(feature = "realsense")]
            CameraBackend::RealSense(source) => source.stop(),
        }
    }
}
