//! Capture sessions: lifecycle, capture thread, and frame delivery.
//!
//! ```text
//!  capture thread                          consumer turn
//!  --------------                          -------------
//!  FrameSource::wait_for_frames
//!      -> FrameQueue::push ----(lock)----> DeliveryBridge::on_wake
//!      -> Doorbell::ring  ----(wake)----->     on_frame(pair) ...
//!  loop exits
//!      -> Finished(outcome) ------------->     on_complete(outcome)
//! ```
//!
//! A `CaptureController` owns the session state machine
//! (Idle -> Running -> Stopping -> Finished -> Idle) and admits at most one
//! session at a time. Each `start` returns a `CaptureSession` handle; the
//! consumer drives delivery through that handle and stops it.

pub mod bridge;
pub mod capture_loop;
pub mod handoff;

pub use bridge::{Callbacks, Dispatch, Doorbell};
pub use capture_loop::{Throttle, DEFAULT_ACQUIRE_TIMEOUT};
pub use handoff::FrameQueue;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use self::bridge::DeliveryBridge;
use self::capture_loop::{CaptureLoop, StopSignal};
use crate::error::CaptureError;
use crate::ingest::FrameSource;
use crate::options::CaptureOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Finished,
}

/// What `CaptureSession::stop` does after signalling the capture thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopPolicy {
    /// Return immediately; completion arrives on a later `dispatch`.
    Detach,
    /// Wait up to the given time for the capture thread to finish, then
    /// deliver pending frames and the completion callback before returning.
    Wait(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; no callbacks were invoked.
    NotRunning,
    /// Stop was signalled; the session has not finished yet.
    Requested,
    /// The session reached Finished.
    Finished,
    /// `StopPolicy::Wait` gave up before the capture thread exited.
    TimedOut,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    /// Bound on each `wait_for_frames` call.
    pub acquire_timeout: Duration,
    pub stop_policy: StopPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            stop_policy: StopPolicy::Wait(DEFAULT_ACQUIRE_TIMEOUT + Duration::from_secs(1)),
        }
    }
}

// ----------------------------------------------------------------------------
// Stats
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct CaptureStats {
    captured: AtomicU64,
    timeouts: AtomicU64,
    delivered: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn record_capture(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self, frames: usize) {
        self.delivered.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.captured.load(Ordering::Relaxed),
            acquisition_timeouts: self.timeouts.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub acquisition_timeouts: u64,
    pub frames_delivered: u64,
}

// ----------------------------------------------------------------------------
// Lifecycle: the serialized state machine
// ----------------------------------------------------------------------------

struct LifecycleInner {
    state: SessionState,
    generation: u64,
}

struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    changed: Condvar,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: SessionState::Idle,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        self.lock().state
    }

    fn state_of(&self, generation: u64) -> SessionState {
        let inner = self.lock();
        if inner.generation == generation {
            inner.state
        } else {
            SessionState::Idle
        }
    }

    /// Idle/Finished -> Running. Returns the new session's generation.
    fn begin(&self) -> Result<u64, CaptureError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Idle | SessionState::Finished => {
                inner.generation += 1;
                inner.state = SessionState::Running;
                Ok(inner.generation)
            }
            SessionState::Running | SessionState::Stopping => Err(CaptureError::AlreadyRunning),
        }
    }

    /// Running -> Stopping. Returns the state seen before the request, or
    /// `None` if this generation is no longer active.
    fn request_stop(&self, generation: u64) -> Option<SessionState> {
        let mut inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        match inner.state {
            SessionState::Running => {
                inner.state = SessionState::Stopping;
                self.changed.notify_all();
                Some(SessionState::Running)
            }
            SessionState::Idle => None,
            state => Some(state),
        }
    }

    /// Running/Stopping -> Finished, called by the capture thread on exit.
    fn finish(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.state = SessionState::Finished;
            self.changed.notify_all();
        }
    }

    /// Finished -> Idle once the consumer has seen the completion.
    fn acknowledge(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == SessionState::Finished {
            inner.state = SessionState::Idle;
            self.changed.notify_all();
        }
    }

    /// Roll back a `begin` whose capture thread never started.
    fn abort(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.state = SessionState::Idle;
            self.changed.notify_all();
        }
    }

    /// Block until this generation is no longer capturing. False on timeout.
    fn wait_finished(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            let capturing = inner.generation == generation
                && matches!(inner.state, SessionState::Running | SessionState::Stopping);
            if !capturing {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = match self.changed.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

// ----------------------------------------------------------------------------
// CaptureController
// ----------------------------------------------------------------------------

/// Admits at most one capture session at a time.
///
/// Share it (`Arc<CaptureController>` or a reference) between every caller
/// that may start sessions on the same device. `start` calls are serialized
/// internally; concurrent callers get `CaptureError::AlreadyRunning`.
pub struct CaptureController {
    lifecycle: Arc<Lifecycle>,
    settings: SessionSettings,
}

impl CaptureController {
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Take ownership of `source` and start capturing on a dedicated thread.
    /// Returns as soon as the thread is spawned.
    ///
    /// Only `AlreadyRunning` is reported here. Every other failure, including
    /// invalid `options` and the source rejecting the stream profile, ends the
    /// session without capturing and arrives through `on_complete`.
    pub fn start<S>(
        &self,
        options: &CaptureOptions,
        source: S,
        callbacks: Callbacks,
    ) -> Result<CaptureSession, CaptureError>
    where
        S: FrameSource + 'static,
    {
        let generation = self.lifecycle.begin()?;

        let description = source.describe();
        let stop = Arc::new(StopSignal::new());
        let stats = Arc::new(CaptureStats::default());
        let (bridge, sender) = DeliveryBridge::new(callbacks);
        let capture = CaptureLoop::new(
            *options,
            Box::new(source),
            stop.clone(),
            self.settings.acquire_timeout,
            sender.clone(),
            stats.clone(),
        );

        let lifecycle = self.lifecycle.clone();
        let thread_description = description.clone();
        let spawned = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| capture.run())) {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CaptureError::unknown("capture thread panicked")),
                };
                match &outcome {
                    Ok(()) => log::info!("session on {} finished", thread_description),
                    Err(err) => log::error!("session on {} failed: {}", thread_description, err),
                }
                sender.on_session_end(outcome);
                lifecycle.finish(generation);
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(err) => {
                self.lifecycle.abort(generation);
                return Err(CaptureError::unknown(format!(
                    "failed to spawn capture thread: {err}"
                )));
            }
        };

        log::info!("session #{} started on {}", generation, description);

        Ok(CaptureSession {
            generation,
            description,
            lifecycle: self.lifecycle.clone(),
            stop,
            stats,
            bridge,
            worker: Some(worker),
            stop_policy: self.settings.stop_policy,
        })
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// CaptureSession
// ----------------------------------------------------------------------------

/// Handle to one Start-to-Finished capture session.
///
/// Callbacks only ever run inside `dispatch` (and `stop` with
/// `StopPolicy::Wait`), i.e. on the thread that owns this handle.
///
/// Dropping a running session requests a stop without waiting; its
/// completion callback is then never invoked.
pub struct CaptureSession {
    generation: u64,
    description: String,
    lifecycle: Arc<Lifecycle>,
    stop: Arc<StopSignal>,
    stats: Arc<CaptureStats>,
    bridge: DeliveryBridge,
    worker: Option<JoinHandle<()>>,
    stop_policy: StopPolicy,
}

impl CaptureSession {
    pub fn id(&self) -> u64 {
        self.generation
    }

    pub fn source(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state_of(self.generation)
    }

    /// True once `on_complete` has been delivered.
    pub fn is_complete(&self) -> bool {
        self.bridge.outcome().is_some()
    }

    /// The delivered terminal outcome, if any.
    pub fn outcome(&self) -> Option<&Result<(), CaptureError>> {
        self.bridge.outcome()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Block up to `timeout` until deliveries are pending.
    ///
    /// For consumers without their own event loop; hosts with one should use
    /// `Callbacks::with_wake_hook` and call `dispatch` when woken.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        self.bridge.doorbell().wait(timeout)
    }

    /// Deliver everything queued so far. Never waits for the capture thread.
    pub fn dispatch(&mut self) -> Dispatch {
        let dispatch = self.bridge.on_wake();
        self.stats.record_delivered(dispatch.frames);
        if dispatch.completed.is_some() {
            self.reap();
        }
        dispatch
    }

    /// Dispatch until the session completes or `timeout` elapses.
    pub fn pump_until_complete(&mut self, timeout: Duration) -> Option<Result<(), CaptureError>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatch();
            if let Some(outcome) = self.bridge.outcome() {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.wait_readable(deadline - now);
        }
    }

    /// Stop using the controller's configured `StopPolicy`.
    pub fn stop(&mut self) -> StopOutcome {
        self.stop_with(self.stop_policy)
    }

    /// Signal the capture thread to exit. Never an error: stopping a session
    /// that is not running does nothing.
    pub fn stop_with(&mut self, policy: StopPolicy) -> StopOutcome {
        if self.is_complete() {
            return StopOutcome::NotRunning;
        }
        let Some(prior) = self.lifecycle.request_stop(self.generation) else {
            return StopOutcome::NotRunning;
        };
        if prior == SessionState::Running {
            log::info!("session #{} stopping", self.generation);
            self.stop.request();
        }

        match policy {
            StopPolicy::Detach if prior == SessionState::Finished => StopOutcome::Finished,
            StopPolicy::Detach => StopOutcome::Requested,
            StopPolicy::Wait(timeout) => {
                if !self.lifecycle.wait_finished(self.generation, timeout) {
                    log::warn!(
                        "session #{} did not finish within {} ms",
                        self.generation,
                        timeout.as_millis()
                    );
                    return StopOutcome::TimedOut;
                }
                self.dispatch();
                StopOutcome::Finished
            }
        }
    }

    /// Join the finished capture thread and return the controller to Idle.
    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            // The thread has already queued its outcome; only the Finished
            // transition is left.
            if worker.join().is_err() {
                log::error!("capture thread for session #{} panicked", self.generation);
            }
        }
        self.lifecycle.acknowledge(self.generation);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.worker.is_some()
            && self.lifecycle.request_stop(self.generation) == Some(SessionState::Running)
        {
            log::warn!(
                "session #{} dropped while running; stopping without delivering its completion",
                self.generation
            );
            self.stop.request();
        }
    }
}
