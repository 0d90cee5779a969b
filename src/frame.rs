//! Frame types.
//!
//! - `Frame`: one image plane. The constructor enforces the buffer-size invariant
//!   `data.len() == width * height * bytes_per_pixel`, so every `Frame` in the
//!   pipeline has a consistent layout.
//! - `FramePair`: one depth frame and one color frame from the same acquisition.
//!
//! Pairs move through the pipeline by value (source -> capture loop -> queue ->
//! consumer). Nothing here is `Clone`; a pair is delivered exactly once.

use std::time::Instant;

use crate::error::CaptureError;

/// Which stream a frame came from. The pixel format is fixed per stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// 16-bit single-channel depth (Z16).
    Depth,
    /// 3-byte packed color (BGR8).
    Color,
}

impl StreamKind {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            StreamKind::Depth => 2,
            StreamKind::Color => 3,
        }
    }

    pub const fn format_name(self) -> &'static str {
        match self {
            StreamKind::Depth => "z16",
            StreamKind::Color => "bgr8",
        }
    }

    /// Expected buffer length for a `width` x `height` frame of this kind.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    kind: StreamKind,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(kind: StreamKind, width: u32, height: u32, data: Vec<u8>) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::device(format!(
                "{} frame has empty dimensions {}x{}",
                kind.format_name(),
                width,
                height
            )));
        }
        let expected = kind.frame_len(width, height);
        if data.len() != expected {
            return Err(CaptureError::device(format!(
                "{} frame {}x{} has {} bytes, expected {}",
                kind.format_name(),
                width,
                height,
                data.len(),
                expected
            )));
        }
        Ok(Self {
            kind,
            width,
            height,
            data,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Depth sample at (x, y) in sensor units, `None` for color frames or
    /// out-of-range coordinates.
    pub fn depth_at(&self, x: u32, y: u32) -> Option<u16> {
        if self.kind != StreamKind::Depth || x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 2;
        Some(u16::from_le_bytes([self.data[offset], self.data[offset + 1]]))
    }
}

// ----------------------------------------------------------------------------
// FramePair
// ----------------------------------------------------------------------------

/// Depth + color from a single `wait_for_frames` call.
#[derive(Debug)]
pub struct FramePair {
    /// Acquisition sequence within the session, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
    depth: Frame,
    color: Frame,
}

impl FramePair {
    pub fn new(depth: Frame, color: Frame) -> Result<Self, CaptureError> {
        if depth.kind() != StreamKind::Depth || color.kind() != StreamKind::Color {
            return Err(CaptureError::device(format!(
                "frame pair has streams ({:?}, {:?}), expected (Depth, Color)",
                depth.kind(),
                color.kind()
            )));
        }
        Ok(Self {
            sequence: 0,
            captured_at: Instant::now(),
            depth,
            color,
        })
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn depth(&self) -> &Frame {
        &self.depth
    }

    pub fn color(&self) -> &Frame {
        &self.color
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn into_frames(self) -> (Frame, Frame) {
        (self.depth, self.color)
    }
}
