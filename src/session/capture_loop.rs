//! The acquisition cycle that runs on the capture thread.
//!
//! Each iteration: throttle -> wait_for_frames -> sequence -> enqueue -> ring.
//! The stop signal is checked once per iteration; an in-flight acquisition is
//! finished (or times out) before the loop notices it. The throttle sleep is
//! the exception: it waits on the stop signal and ends early on a stop request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::bridge::DeliverySender;
use super::CaptureStats;
use crate::error::CaptureError;
use crate::ingest::FrameSource;
use crate::options::{CaptureConfig, CaptureOptions};

/// Default bound on a single `wait_for_frames` call.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(5000);

// ----------------------------------------------------------------------------
// StopSignal
// ----------------------------------------------------------------------------

pub(crate) struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn request(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Taking the lock orders this store before any sleeper's re-check.
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.cond.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop is requested first.
    /// Returns true if the stop signal is set.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.cond.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

// ----------------------------------------------------------------------------
// Throttle
// ----------------------------------------------------------------------------

/// Output rate cap, measured from the last successful acquisition.
#[derive(Clone, Debug)]
pub struct Throttle {
    interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_frame: None,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.throttle_interval())
    }

    /// How long to wait before the next acquisition. Never negative: once the
    /// interval has elapsed the delay is zero.
    pub fn delay(&self, now: Instant) -> Duration {
        match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => {
                interval.saturating_sub(now.saturating_duration_since(last))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn mark(&mut self, at: Instant) {
        self.last_frame = Some(at);
    }
}

// ----------------------------------------------------------------------------
// CaptureLoop
// ----------------------------------------------------------------------------

pub(crate) struct CaptureLoop {
    options: CaptureOptions,
    source: Box<dyn FrameSource>,
    stop: Arc<StopSignal>,
    acquire_timeout: Duration,
    sender: DeliverySender,
    stats: Arc<CaptureStats>,
    sequence: u64,
}

impl CaptureLoop {
    pub(crate) fn new(
        options: CaptureOptions,
        source: Box<dyn FrameSource>,
        stop: Arc<StopSignal>,
        acquire_timeout: Duration,
        sender: DeliverySender,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            options,
            source,
            stop,
            acquire_timeout,
            sender,
            stats,
            sequence: 0,
        }
    }

    /// Run until stopped or a fatal error. The source is stopped on every exit path.
    pub(crate) fn run(mut self) -> Result<(), CaptureError> {
        let result = self.capture();
        self.source.stop();
        result
    }

    fn capture(&mut self) -> Result<(), CaptureError> {
        // Invalid options end the session before the device is touched.
        let config = self.options.validate()?;
        self.source.start(&config).map_err(into_fatal)?;
        log::info!(
            "capture started on {} (depth {}x{}, color {}x{}, {} fps, max fps {}, acquire timeout {} ms)",
            self.source.describe(),
            config.depth_width(),
            config.depth_height(),
            config.color_width(),
            config.color_height(),
            config.fps(),
            config.max_fps(),
            self.acquire_timeout.as_millis()
        );

        let mut throttle = Throttle::from_config(&config);
        while !self.stop.is_set() {
            let delay = throttle.delay(Instant::now());
            if !delay.is_zero() && self.stop.sleep(delay) {
                break;
            }

            match self.source.wait_for_frames(self.acquire_timeout) {
                Ok(pair) => {
                    throttle.mark(Instant::now());
                    self.sequence += 1;
                    self.stats.record_capture();
                    log::trace!("captured frame pair #{}", self.sequence);
                    self.sender.send_frame(pair.with_sequence(self.sequence));
                }
                Err(err) if err.is_transient() => {
                    self.stats.record_timeout();
                    log::debug!("{} on {}, retrying", err, self.source.describe());
                }
                Err(err) => return Err(into_fatal(err)),
            }
        }
        log::info!(
            "capture stopped on {} after {} frame pairs",
            self.source.describe(),
            self.sequence
        );
        Ok(())
    }
}

/// Errors that end the loop are always reported as one of the fatal kinds.
fn into_fatal(err: CaptureError) -> CaptureError {
    if err.is_fatal() {
        err
    } else {
        CaptureError::unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FramePair, StreamKind};
    use crate::options::CaptureOptions;
    use crate::session::bridge::{Callbacks, DeliveryBridge};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    enum Step {
        Pair,
        Timeout,
        Fail(CaptureError),
    }

    /// Replays a fixed script, then blocks in short timeouts.
    struct ScriptedSource {
        steps: VecDeque<Step>,
        stops: Arc<AtomicUsize>,
        started: bool,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>, stops: Arc<AtomicUsize>) -> Self {
            Self {
                steps: steps.into(),
                stops,
                started: false,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn start(&mut self, _config: &CaptureConfig) -> Result<(), CaptureError> {
            self.started = true;
            Ok(())
        }

        fn wait_for_frames(&mut self, _timeout: Duration) -> Result<FramePair, CaptureError> {
            match self.steps.pop_front() {
                Some(Step::Pair) => {
                    let depth = Frame::new(StreamKind::Depth, 1, 1, vec![0; 2])?;
                    let color = Frame::new(StreamKind::Color, 1, 1, vec![0; 3])?;
                    FramePair::new(depth, color)
                }
                Some(Step::Timeout) => Err(CaptureError::AcquisitionTimeout),
                Some(Step::Fail(err)) => Err(err),
                None => {
                    thread::sleep(Duration::from_millis(2));
                    Err(CaptureError::AcquisitionTimeout)
                }
            }
        }

        fn stop(&mut self) {
            if self.started {
                self.started = false;
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    type Harness = (
        CaptureLoop,
        DeliveryBridge,
        Arc<StopSignal>,
        Arc<CaptureStats>,
        Arc<AtomicUsize>,
    );

    fn harness(steps: Vec<Step>, max_fps: i32) -> Harness {
        harness_with(steps, max_fps, Callbacks::new(|_| {}, |_| {}))
    }

    fn harness_with(steps: Vec<Step>, max_fps: i32, callbacks: Callbacks) -> Harness {
        let options = CaptureOptions {
            max_fps,
            ..CaptureOptions::default()
        };
        harness_for(options, steps, callbacks)
    }

    fn harness_for(options: CaptureOptions, steps: Vec<Step>, callbacks: Callbacks) -> Harness {
        let stops = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(StopSignal::new());
        let stats = Arc::new(CaptureStats::default());
        let (bridge, sender) = DeliveryBridge::new(callbacks);
        let capture = CaptureLoop::new(
            options,
            Box::new(ScriptedSource::new(steps, stops.clone())),
            stop.clone(),
            Duration::from_millis(10),
            sender,
            stats.clone(),
        );
        (capture, bridge, stop, stats, stops)
    }

    #[test]
    fn throttle_delay_clamps_to_zero() {
        let mut throttle = Throttle::new(Some(Duration::from_millis(100)));
        let t0 = Instant::now();
        assert_eq!(throttle.delay(t0), Duration::ZERO);

        throttle.mark(t0);
        assert_eq!(throttle.delay(t0 + Duration::from_millis(40)), Duration::from_millis(60));
        assert_eq!(throttle.delay(t0 + Duration::from_millis(100)), Duration::ZERO);
        assert_eq!(throttle.delay(t0 + Duration::from_millis(250)), Duration::ZERO);
    }

    #[test]
    fn unthrottled_never_delays() {
        let mut throttle = Throttle::new(None);
        let now = Instant::now();
        throttle.mark(now);
        assert_eq!(throttle.delay(now), Duration::ZERO);
    }

    #[test]
    fn stop_signal_interrupts_sleep() {
        let stop = Arc::new(StopSignal::new());
        let requester = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            requester.request();
        });
        let started = Instant::now();
        assert!(stop.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        assert!(!StopSignal::new().sleep(Duration::from_millis(1)));
    }

    #[test]
    fn device_error_ends_loop_after_delivered_frames() {
        let steps = vec![
            Step::Pair,
            Step::Timeout,
            Step::Pair,
            Step::Fail(CaptureError::device("unplugged")),
            Step::Pair,
        ];
        let (capture, mut bridge, _stop, stats, stops) = harness(steps, 0);

        let result = capture.run();
        assert_eq!(result, Err(CaptureError::device("unplugged")));
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_captured, 2);
        assert_eq!(snapshot.acquisition_timeouts, 1);
        assert_eq!(bridge.on_wake().frames, 2);
    }

    #[test]
    fn invalid_options_end_loop_before_source_starts() {
        let options = CaptureOptions {
            color_height: -480,
            ..CaptureOptions::default()
        };
        let (capture, mut bridge, _stop, stats, stops) =
            harness_for(options, vec![Step::Pair], Callbacks::new(|_| {}, |_| {}));

        assert!(matches!(capture.run(), Err(CaptureError::Configuration(_))));
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().frames_captured, 0);
        assert_eq!(bridge.on_wake().frames, 0);
    }

    #[test]
    fn non_fatal_source_errors_become_unknown() {
        let (capture, _bridge, _stop, _stats, _stops) =
            harness(vec![Step::Fail(CaptureError::AlreadyRunning)], 0);
        assert!(matches!(capture.run(), Err(CaptureError::Unknown(_))));
    }

    #[test]
    fn stop_request_ends_loop_cleanly() {
        let (capture, _bridge, stop, _stats, stops) = harness(Vec::new(), 0);
        let handle = thread::spawn(move || capture.run());
        thread::sleep(Duration::from_millis(20));
        stop.request();
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn throttled_loop_spaces_acquisitions() {
        let steps = (0..4).map(|_| Step::Pair).collect();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = stamps.clone();
        let callbacks = Callbacks::new(
            move |pair: FramePair| sink.lock().unwrap().push(pair.captured_at()),
            |_| {},
        );
        // 50 fps cap -> 20 ms between pairs.
        let (capture, mut bridge, stop, _stats, _stops) = harness_with(steps, 50, callbacks);
        let handle = thread::spawn(move || capture.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while stamps.lock().unwrap().len() < 4 && Instant::now() < deadline {
            bridge.doorbell().wait(Duration::from_millis(50));
            bridge.on_wake();
        }
        stop.request();
        handle.join().unwrap().unwrap();

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(20));
        }
    }
}
