//! Delivery bridge: wake the consumer, drain the handoff queue, run callbacks.
//!
//! The producer side enqueues `Delivery::Frame` for each captured pair and a
//! single `Delivery::Finished` after the capture loop has exited, then rings
//! the doorbell. The consumer side runs `DeliveryBridge::on_wake` on its own
//! turn. Because the terminal outcome travels through the same queue, it is
//! always observed after the last frame.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::handoff::FrameQueue;
use crate::error::CaptureError;
use crate::frame::FramePair;

pub(crate) enum Delivery {
    Frame(FramePair),
    Finished(Result<(), CaptureError>),
}

// ----------------------------------------------------------------------------
// Doorbell: coalescing wake primitive
// ----------------------------------------------------------------------------

type WakeHook = Box<dyn Fn() + Send + Sync>;

/// One-shot wake flag. Rings before the consumer takes the flag collapse into
/// one wake.
pub struct Doorbell {
    rung: Mutex<bool>,
    cond: Condvar,
    hook: Option<WakeHook>,
}

impl Doorbell {
    pub fn new() -> Self {
        Self::from_hook(None)
    }

    /// `hook` runs on the ringing thread each time the bell goes from quiet
    /// to rung, e.g. to post a "dispatch now" task to a host event loop.
    pub fn with_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self::from_hook(Some(Box::new(hook)))
    }

    fn from_hook(hook: Option<WakeHook>) -> Self {
        Self {
            rung: Mutex::new(false),
            cond: Condvar::new(),
            hook,
        }
    }

    pub fn ring(&self) {
        let was_rung = {
            let mut rung = self.lock();
            let was_rung = *rung;
            *rung = true;
            was_rung
        };
        if !was_rung {
            self.cond.notify_all();
            if let Some(hook) = &self.hook {
                hook();
            }
        }
    }

    /// Clear the bell without waiting. Returns whether it had been rung.
    pub fn take(&self) -> bool {
        std::mem::replace(&mut *self.lock(), false)
    }

    /// Wait up to `timeout` for a ring, clearing it. Returns whether it rang.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut rung = self.lock();
        while !*rung {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            rung = match self.cond.wait_timeout(rung, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *rung = false;
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.rung.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Doorbell {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Callbacks
// ----------------------------------------------------------------------------

type FrameCallback = Box<dyn FnMut(FramePair) + Send>;
type CompleteCallback = Box<dyn FnOnce(Result<(), CaptureError>) + Send>;

/// User callbacks for one session, always invoked on the consumer's turn.
pub struct Callbacks {
    pub(crate) on_frame: FrameCallback,
    pub(crate) on_complete: Option<CompleteCallback>,
    pub(crate) wake_hook: Option<WakeHook>,
}

impl Callbacks {
    pub fn new(
        on_frame: impl FnMut(FramePair) + Send + 'static,
        on_complete: impl FnOnce(Result<(), CaptureError>) + Send + 'static,
    ) -> Self {
        Self {
            on_frame: Box::new(on_frame),
            on_complete: Some(Box::new(on_complete)),
            wake_hook: None,
        }
    }

    /// Called from the capture thread whenever new deliveries are pending.
    pub fn with_wake_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.wake_hook = Some(Box::new(hook));
        self
    }
}

// ----------------------------------------------------------------------------
// Producer half
// ----------------------------------------------------------------------------

/// Producer half held by the capture thread.
#[derive(Clone)]
pub(crate) struct DeliverySender {
    queue: Arc<FrameQueue<Delivery>>,
    doorbell: Arc<Doorbell>,
}

impl DeliverySender {
    pub(crate) fn send_frame(&self, pair: FramePair) {
        self.queue.push(Delivery::Frame(pair));
        self.doorbell.ring();
    }

    pub(crate) fn on_session_end(&self, outcome: Result<(), CaptureError>) {
        self.queue.push(Delivery::Finished(outcome));
        self.doorbell.ring();
    }
}

// ----------------------------------------------------------------------------
// Consumer half
// ----------------------------------------------------------------------------

/// What one dispatch pass delivered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub frames: usize,
    /// Set on the pass that delivered the completion callback.
    pub completed: Option<Result<(), CaptureError>>,
}

pub(crate) struct DeliveryBridge {
    queue: Arc<FrameQueue<Delivery>>,
    doorbell: Arc<Doorbell>,
    on_frame: FrameCallback,
    on_complete: Option<CompleteCallback>,
    outcome: Option<Result<(), CaptureError>>,
}

impl DeliveryBridge {
    pub(crate) fn new(callbacks: Callbacks) -> (Self, DeliverySender) {
        let doorbell = Arc::new(Doorbell::from_hook(callbacks.wake_hook));
        let queue = Arc::new(FrameQueue::new());
        let sender = DeliverySender {
            queue: queue.clone(),
            doorbell: doorbell.clone(),
        };
        let bridge = Self {
            queue,
            doorbell,
            on_frame: callbacks.on_frame,
            on_complete: callbacks.on_complete,
            outcome: None,
        };
        (bridge, sender)
    }

    pub(crate) fn doorbell(&self) -> &Doorbell {
        &self.doorbell
    }

    /// Terminal outcome, once it has been delivered.
    pub(crate) fn outcome(&self) -> Option<&Result<(), CaptureError>> {
        self.outcome.as_ref()
    }

    /// Drain the queue and invoke callbacks in capture order.
    pub(crate) fn on_wake(&mut self) -> Dispatch {
        self.doorbell.take();
        let mut dispatch = Dispatch::default();
        for delivery in self.queue.drain_all() {
            match delivery {
                Delivery::Frame(pair) => {
                    if self.outcome.is_some() {
                        log::warn!("dropping frame #{} queued after session end", pair.sequence);
                        continue;
                    }
                    (self.on_frame)(pair);
                    dispatch.frames += 1;
                }
                Delivery::Finished(outcome) => {
                    if self.outcome.is_some() {
                        continue;
                    }
                    if let Some(on_complete) = self.on_complete.take() {
                        on_complete(outcome.clone());
                    }
                    dispatch.completed = Some(outcome.clone());
                    self.outcome = Some(outcome);
                }
            }
        }
        dispatch
    }
}
