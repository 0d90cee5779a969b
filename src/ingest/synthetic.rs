//! Synthetic frame source.
//!
//! Produces depth + color pairs at the configured resolutions without any
//! hardware. Used for `stub://` URIs and for exercising the delivery pipeline:
//! failures can be scripted (device loss after N pairs, periodic acquisition
//! timeouts, a rejected stream profile).
//!
//! Every depth sample of pair `n` carries the value `n` (truncated to 16 bits),
//! so consumers can check capture order from the pixels alone.

use std::thread;
use std::time::Duration;

use super::FrameSource;
use crate::error::CaptureError;
use crate::frame::{Frame, FramePair, StreamKind};
use crate::options::CaptureConfig;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    /// Sleep one frame period (1 / fps) per pair, like a real sensor.
    pub paced: bool,
    /// Report a device error after this many pairs.
    pub fail_after: Option<u64>,
    /// Every Nth wait times out instead of producing a pair.
    pub stall_every: Option<u64>,
    /// Reject `start` with this configuration error.
    pub reject_config: Option<String>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            paced: true,
            fail_after: None,
            stall_every: None,
            reject_config: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    stream: Option<CaptureConfig>,
    frames_generated: u64,
    waits: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            stream: None,
            frames_generated: 0,
            waits: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frames_generated
    }

    fn generate_pair(&self, stream: &CaptureConfig, n: u64) -> Result<FramePair, CaptureError> {
        let (dw, dh) = (stream.depth_width(), stream.depth_height());
        let sample = (n as u16).to_le_bytes();
        let depth_data = sample
            .iter()
            .copied()
            .cycle()
            .take(StreamKind::Depth.frame_len(dw, dh))
            .collect();

        let (cw, ch) = (stream.color_width(), stream.color_height());
        let mut color_data = vec![0u8; StreamKind::Color.frame_len(cw, ch)];
        for (i, px) in color_data.iter_mut().enumerate() {
            *px = ((i as u64 + n) % 256) as u8;
        }

        FramePair::new(
            Frame::new(StreamKind::Depth, dw, dh, depth_data)?,
            Frame::new(StreamKind::Color, cw, ch, color_data)?,
        )
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.config.name)
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if let Some(reason) = &self.config.reject_config {
            return Err(CaptureError::configuration(reason.clone()));
        }
        log::info!(
            "SyntheticSource: {} streaming depth {}x{} color {}x{} @ {} fps",
            self.describe(),
            config.depth_width(),
            config.depth_height(),
            config.color_width(),
            config.color_height(),
            config.fps()
        );
        self.stream = Some(*config);
        Ok(())
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, CaptureError> {
        let stream = self
            .stream
            .ok_or_else(|| CaptureError::device("synthetic source is not started"))?;
        self.waits += 1;

        let period = Duration::from_secs(1) / stream.fps();
        if self.config.paced {
            thread::sleep(period.min(timeout));
        }

        if let Some(every) = self.config.stall_every {
            if every > 0 && self.waits % every == 0 {
                return Err(CaptureError::AcquisitionTimeout);
            }
        }
        if let Some(limit) = self.config.fail_after {
            if self.frames_generated >= limit {
                return Err(CaptureError::device(format!(
                    "{} disconnected after {} frames",
                    self.describe(),
                    limit
                )));
            }
        }

        self.frames_generated += 1;
        self.generate_pair(&stream, self.frames_generated)
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::info!(
                "SyntheticSource: {} stopped after {} frames",
                self.describe(),
                self.frames_generated
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CaptureOptions;

    fn small_config() -> CaptureConfig {
        CaptureOptions {
            depth_width: 4,
            depth_height: 2,
            color_width: 3,
            color_height: 3,
            fps: 30,
            max_fps: 0,
        }
        .validate()
        .unwrap()
    }

    fn unpaced(config: SyntheticConfig) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            paced: false,
            ..config
        })
    }

    #[test]
    fn pairs_match_configured_resolution() {
        let mut source = unpaced(SyntheticConfig::default());
        source.start(&small_config()).unwrap();
        let pair = source.wait_for_frames(Duration::from_millis(10)).unwrap();
        assert_eq!(pair.depth().data().len(), 4 * 2 * 2);
        assert_eq!(pair.color().data().len(), 3 * 3 * 3);
        assert_eq!(pair.depth().depth_at(3, 1), Some(1));
    }

    #[test]
    fn depth_samples_tag_frame_number() {
        let mut source = unpaced(SyntheticConfig::default());
        source.start(&small_config()).unwrap();
        for n in 1..=3u16 {
            let pair = source.wait_for_frames(Duration::from_millis(10)).unwrap();
            assert_eq!(pair.depth().depth_at(0, 0), Some(n));
        }
    }

    #[test]
    fn fails_after_scripted_frame_count() {
        let mut source = unpaced(SyntheticConfig {
            fail_after: Some(2),
            ..SyntheticConfig::default()
        });
        source.start(&small_config()).unwrap();
        assert!(source.wait_for_frames(Duration::from_millis(10)).is_ok());
        assert!(source.wait_for_frames(Duration::from_millis(10)).is_ok());
        let err = source.wait_for_frames(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CaptureError::Device(_)));
    }

    #[test]
    fn stalls_report_timeouts() {
        let mut source = unpaced(SyntheticConfig {
            stall_every: Some(2),
            ..SyntheticConfig::default()
        });
        source.start(&small_config()).unwrap();
        assert!(source.wait_for_frames(Duration::from_millis(10)).is_ok());
        assert_eq!(
            source.wait_for_frames(Duration::from_millis(10)).unwrap_err(),
            CaptureError::AcquisitionTimeout
        );
        assert!(source.wait_for_frames(Duration::from_millis(10)).is_ok());
        assert_eq!(source.frames_generated(), 2);
    }

    #[test]
    fn rejected_profile_is_configuration_error() {
        let mut source = unpaced(SyntheticConfig {
            reject_config: Some("no such profile".to_string()),
            ..SyntheticConfig::default()
        });
        let err = source.start(&small_config()).unwrap_err();
        assert_eq!(err, CaptureError::configuration("no such profile"));
    }

    #[test]
    fn wait_before_start_is_device_error() {
        let mut source = unpaced(SyntheticConfig::default());
        assert!(matches!(
            source.wait_for_frames(Duration::from_millis(1)),
            Err(CaptureError::Device(_))
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut source = unpaced(SyntheticConfig::default());
        source.stop();
        source.start(&small_config()).unwrap();
        source.stop();
        source.stop();
        assert!(source.wait_for_frames(Duration::from_millis(1)).is_err());
    }
}
