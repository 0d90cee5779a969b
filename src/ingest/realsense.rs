//! RealSense frame source.
//!
//! Wraps a librealsense2 pipeline (via `realsense-rust`) streaming Z16 depth
//! and BGR8 color. SDK errors are converted to `CaptureError` kinds here:
//! - stream profile / pipeline activation failures -> `Configuration`
//! - wait timeouts -> `AcquisitionTimeout`
//! - everything else during streaming -> `Device`
//!
//! Pixel rows are copied out of SDK memory before the frameset is released,
//! honoring the SDK's row stride.

use std::convert::TryFrom;
use std::ffi::CString;
use std::time::Duration;

use realsense_rust::{
    config::Config,
    context::Context,
    frame::{ColorFrame, DepthFrame, FrameEx},
    kind::{Rs2Format, Rs2StreamKind},
    pipeline::{ActivePipeline, FrameWaitError, InactivePipeline},
};

use super::FrameSource;
use crate::error::CaptureError;
use crate::frame::{Frame, FramePair, StreamKind};
use crate::options::CaptureConfig;

pub struct RealSenseSource {
    serial: Option<String>,
    // Field order matters: the pipeline is dropped before its context.
    pipeline: Option<ActivePipeline>,
    context: Option<Context>,
    frames_captured: u64,
}

impl RealSenseSource {
    pub fn new(serial: Option<String>) -> Self {
        Self {
            serial,
            pipeline: None,
            context: None,
            frames_captured: 0,
        }
    }

    fn build_config(&self, stream: &CaptureConfig) -> Result<Config, CaptureError> {
        let mut config = Config::new();
        if let Some(serial) = &self.serial {
            let serial = CString::new(serial.as_str())
                .map_err(|_| CaptureError::configuration("serial number contains a NUL byte"))?;
            config
                .enable_device_from_serial(&serial)
                .map_err(|e| CaptureError::configuration(format!("select device: {e}")))?;
        }
        config
            .disable_all_streams()
            .map_err(|e| CaptureError::configuration(format!("reset streams: {e}")))?
            .enable_stream(
                Rs2StreamKind::Depth,
                None,
                stream.depth_width() as usize,
                stream.depth_height() as usize,
                Rs2Format::Z16,
                stream.fps() as usize,
            )
            .map_err(|e| CaptureError::configuration(format!("enable depth stream: {e}")))?
            .enable_stream(
                Rs2StreamKind::Color,
                None,
                stream.color_width() as usize,
                stream.color_height() as usize,
                Rs2Format::Bgr8,
                stream.fps() as usize,
            )
            .map_err(|e| CaptureError::configuration(format!("enable color stream: {e}")))?;
        Ok(config)
    }
}

impl FrameSource for RealSenseSource {
    fn describe(&self) -> String {
        match &self.serial {
            Some(serial) => format!("realsense://{serial}"),
            None => "realsense://".to_string(),
        }
    }

    fn start(&mut self, stream: &CaptureConfig) -> Result<(), CaptureError> {
        self.stop();

        let context =
            Context::new().map_err(|e| CaptureError::device(format!("create context: {e}")))?;
        let pipeline = InactivePipeline::try_from(&context)
            .map_err(|e| CaptureError::device(format!("create pipeline: {e}")))?;
        let config = self.build_config(stream)?;
        let pipeline = pipeline
            .start(Some(config))
            .map_err(|e| CaptureError::configuration(format!("start pipeline: {e}")))?;

        log::info!("RealSenseSource: {} started", self.describe());
        self.pipeline = Some(pipeline);
        self.context = Some(context);
        Ok(())
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, CaptureError> {
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| CaptureError::device("realsense pipeline is not started"))?;

        let frames = match pipeline.wait(Some(timeout)) {
            Ok(frames) => frames,
            Err(FrameWaitError::DidTimeoutBeforeFrameArrival) => {
                return Err(CaptureError::AcquisitionTimeout)
            }
            Err(e) => return Err(CaptureError::device(e.to_string())),
        };

        let depth = frames.frames_of_type::<DepthFrame>().pop();
        let color = frames.frames_of_type::<ColorFrame>().pop();
        let (Some(depth), Some(color)) = (depth, color) else {
            // The SDK occasionally delivers partial framesets while streams warm up.
            log::debug!("RealSenseSource: incomplete frameset, waiting for the next one");
            return Err(CaptureError::AcquisitionTimeout);
        };

        let depth = copy_plane(
            StreamKind::Depth,
            depth.width(),
            depth.height(),
            depth.stride(),
            depth.get_data_size(),
            depth.get_data() as *const std::os::raw::c_void as *const u8,
        )?;
        let color = copy_plane(
            StreamKind::Color,
            color.width(),
            color.height(),
            color.stride(),
            color.get_data_size(),
            color.get_data() as *const std::os::raw::c_void as *const u8,
        )?;

        self.frames_captured += 1;
        FramePair::new(depth, color)
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _inactive = pipeline.stop();
            log::info!(
                "RealSenseSource: {} stopped after {} frames",
                self.describe(),
                self.frames_captured
            );
        }
        self.context = None;
    }
}

impl Drop for RealSenseSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_plane(
    kind: StreamKind,
    width: usize,
    height: usize,
    stride: usize,
    size: usize,
    ptr: *const u8,
) -> Result<Frame, CaptureError> {
    let row_len = width * kind.bytes_per_pixel();
    if stride < row_len || size < stride * height.saturating_sub(1) + row_len {
        return Err(CaptureError::device(format!(
            "{} frame {}x{} has stride {} and {} bytes",
            kind.format_name(),
            width,
            height,
            stride,
            size
        )));
    }
    // SAFETY: the SDK guarantees `size` readable bytes at `ptr` while the
    // frame is alive, and the caller holds the frame for this call.
    let raw = unsafe { std::slice::from_raw_parts(ptr, size) };
    let mut data = Vec::with_capacity(row_len * height);
    for row in 0..height {
        let start = row * stride;
        data.extend_from_slice(&raw[start..start + row_len]);
    }
    Frame::new(kind, width as u32, height as u32, data)
}
