//! Packed frame-pair records.
//!
//! Layout (little-endian, no padding):
//!
//! ```text
//! [depth_width:i32][depth_height:i32][depth bytes, 2 per pixel]
//! [color_width:i32][color_height:i32][color bytes, 3 per pixel]
//! ```
//!
//! In-process delivery moves `FramePair` values directly. Records are only
//! produced when pairs leave the process, e.g. the dump files written by
//! `framebridged` and read back by `dump_verify`. Records are self-delimiting
//! and are written back-to-back.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{ErrorKind, Read, Write};

use crate::frame::{Frame, FramePair, StreamKind};

const HEADER_LEN: usize = 8;

/// Upper bound on one plane's pixel bytes. Headers that claim more are
/// rejected before anything is allocated.
pub const MAX_PLANE_BYTES: usize = 64 * 1024 * 1024;

/// Total record length for a pair.
pub fn record_len(pair: &FramePair) -> usize {
    2 * HEADER_LEN + pair.depth().data().len() + pair.color().data().len()
}

pub fn encode(pair: &FramePair) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record_len(pair));
    push_plane(&mut buf, pair.depth());
    push_plane(&mut buf, pair.color());
    buf
}

fn push_plane(buf: &mut Vec<u8>, frame: &Frame) {
    buf.extend_from_slice(&(frame.width() as i32).to_le_bytes());
    buf.extend_from_slice(&(frame.height() as i32).to_le_bytes());
    buf.extend_from_slice(frame.data());
}

pub fn write_pair<W: Write>(writer: &mut W, pair: &FramePair) -> Result<()> {
    writer
        .write_all(&encode(pair))
        .with_context(|| format!("write frame pair #{}", pair.sequence))
}

/// Decode one record that occupies the whole of `bytes`.
pub fn decode(bytes: &[u8], sequence: u64) -> Result<FramePair> {
    let mut cursor = bytes;
    let pair = read_pair(&mut cursor, sequence)?
        .ok_or_else(|| anyhow!("empty frame pair record"))?;
    if !cursor.is_empty() {
        bail!("{} trailing bytes after frame pair record", cursor.len());
    }
    Ok(pair)
}

/// Read the next record from a stream of records.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes before the first
/// header). A record cut short anywhere else is an error.
pub fn read_pair<R: Read>(reader: &mut R, sequence: u64) -> Result<Option<FramePair>> {
    let mut header = [0u8; HEADER_LEN];
    if !read_exact_or_eof(reader, &mut header)? {
        return Ok(None);
    }
    let depth = read_plane(reader, StreamKind::Depth, header)
        .with_context(|| format!("record #{sequence}: depth plane"))?;

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .with_context(|| format!("record #{sequence}: truncated color header"))?;
    let color = read_plane(reader, StreamKind::Color, header)
        .with_context(|| format!("record #{sequence}: color plane"))?;

    let pair = FramePair::new(depth, color).map_err(|e| anyhow!("record #{sequence}: {e}"))?;
    Ok(Some(pair.with_sequence(sequence)))
}

fn read_plane<R: Read>(reader: &mut R, kind: StreamKind, header: [u8; HEADER_LEN]) -> Result<Frame> {
    let width = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let height = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if width <= 0 || height <= 0 {
        bail!("invalid {} dimensions {}x{}", kind.format_name(), width, height);
    }
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(kind.bytes_per_pixel()))
        .filter(|len| *len <= MAX_PLANE_BYTES)
        .ok_or_else(|| {
            anyhow!(
                "{} plane {}x{} exceeds {} bytes",
                kind.format_name(),
                width,
                height,
                MAX_PLANE_BYTES
            )
        })?;
    let mut data = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut data)
        .context("failed to read pixel data")?;
    if data.len() != len {
        bail!("truncated pixel data ({} of {} bytes)", data.len(), len);
    }
    Frame::new(kind, width as u32, height as u32, data).map_err(|e| anyhow!("{e}"))
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => bail!("truncated record header ({} of {} bytes)", filled, buf.len()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
