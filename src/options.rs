//! Stream options as the host passes them, and the validated per-session config.

use serde::Deserialize;
use std::time::Duration;

use crate::error::CaptureError;

pub const DEFAULT_DEPTH_WIDTH: i32 = 640;
pub const DEFAULT_DEPTH_HEIGHT: i32 = 480;
pub const DEFAULT_COLOR_WIDTH: i32 = 640;
pub const DEFAULT_COLOR_HEIGHT: i32 = 480;
pub const DEFAULT_FPS: i32 = 30;

/// Host-facing capture options.
///
/// Keys mirror the host API (`depthWidth`, `maxFPS`, ...). Missing keys take
/// their defaults. Values are signed so that bad host input survives parsing
/// and is rejected by [`CaptureOptions::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    pub depth_width: i32,
    pub depth_height: i32,
    pub color_width: i32,
    pub color_height: i32,
    pub fps: i32,
    /// Output rate cap. 0 means unthrottled.
    #[serde(rename = "maxFPS", alias = "maxFps")]
    pub max_fps: i32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            depth_width: DEFAULT_DEPTH_WIDTH,
            depth_height: DEFAULT_DEPTH_HEIGHT,
            color_width: DEFAULT_COLOR_WIDTH,
            color_height: DEFAULT_COLOR_HEIGHT,
            fps: DEFAULT_FPS,
            max_fps: 0,
        }
    }
}

impl CaptureOptions {
    pub fn validate(&self) -> Result<CaptureConfig, CaptureError> {
        Ok(CaptureConfig {
            depth_width: positive("depthWidth", self.depth_width)?,
            depth_height: positive("depthHeight", self.depth_height)?,
            color_width: positive("colorWidth", self.color_width)?,
            color_height: positive("colorHeight", self.color_height)?,
            fps: positive("fps", self.fps)?,
            max_fps: u32::try_from(self.max_fps).map_err(|_| {
                CaptureError::configuration(format!("maxFPS must be >= 0 (got {})", self.max_fps))
            })?,
        })
    }
}

fn positive(key: &str, value: i32) -> Result<u32, CaptureError> {
    if value <= 0 {
        return Err(CaptureError::configuration(format!(
            "{key} must be > 0 (got {value})"
        )));
    }
    Ok(value as u32)
}

/// Validated, immutable stream configuration for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    depth_width: u32,
    depth_height: u32,
    color_width: u32,
    color_height: u32,
    fps: u32,
    max_fps: u32,
}

impl CaptureConfig {
    pub fn depth_width(&self) -> u32 {
        self.depth_width
    }

    pub fn depth_height(&self) -> u32 {
        self.depth_height
    }

    pub fn color_width(&self) -> u32 {
        self.color_width
    }

    pub fn color_height(&self) -> u32 {
        self.color_height
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn max_fps(&self) -> u32 {
        self.max_fps
    }

    /// Minimum spacing between delivered pairs, `None` when unthrottled.
    pub fn throttle_interval(&self) -> Option<Duration> {
        if self.max_fps == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / self.max_fps)
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            depth_width: DEFAULT_DEPTH_WIDTH as u32,
            depth_height: DEFAULT_DEPTH_HEIGHT as u32,
            color_width: DEFAULT_COLOR_WIDTH as u32,
            color_height: DEFAULT_COLOR_HEIGHT as u32,
            fps: DEFAULT_FPS as u32,
            max_fps: 0,
        }
    }
}
