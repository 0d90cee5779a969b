use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use framebridge::{
    Callbacks, CameraSource, CaptureController, CaptureError, CaptureOptions, FramePair,
    SessionSettings, SessionState, StopOutcome, StopPolicy, SyntheticConfig, SyntheticSource,
};

#[derive(Debug, PartialEq)]
enum Event {
    Frame(u64),
    Complete(Result<(), CaptureError>),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

fn recording() -> (Callbacks, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (frames, done) = (log.clone(), log.clone());
    let callbacks = Callbacks::new(
        move |pair: FramePair| frames.lock().unwrap().push(Event::Frame(pair.sequence)),
        move |outcome| done.lock().unwrap().push(Event::Complete(outcome)),
    );
    (callbacks, log)
}

fn small(fps: i32, max_fps: i32) -> CaptureOptions {
    CaptureOptions {
        depth_width: 16,
        depth_height: 12,
        color_width: 16,
        color_height: 12,
        fps,
        max_fps,
    }
}

fn synthetic(config: SyntheticConfig) -> SyntheticSource {
    SyntheticSource::new(config)
}

fn unpaced() -> SyntheticConfig {
    SyntheticConfig {
        paced: false,
        ..SyntheticConfig::default()
    }
}

fn frames_in(log: &EventLog) -> Vec<u64> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            Event::Frame(seq) => Some(*seq),
            Event::Complete(_) => None,
        })
        .collect()
}

#[test]
fn start_then_immediate_stop_completes_once_with_nothing_after() {
    let controller = CaptureController::new();
    let (callbacks, log) = recording();
    let mut session = controller
        .start(&small(30, 0), synthetic(SyntheticConfig::default()), callbacks)
        .expect("start");

    let began = Instant::now();
    assert_eq!(
        session.stop_with(StopPolicy::Wait(Duration::from_secs(5))),
        StopOutcome::Finished
    );
    assert!(began.elapsed() < Duration::from_secs(2));
    assert!(session.is_complete());

    // Nothing left to deliver, and a second stop is a no-op.
    assert_eq!(session.dispatch().frames, 0);
    assert_eq!(session.stop(), StopOutcome::NotRunning);

    let events = log.lock().unwrap();
    assert_eq!(events.last(), Some(&Event::Complete(Ok(()))));
    let completions = events
        .iter()
        .filter(|e| matches!(e, Event::Complete(_)))
        .count();
    assert_eq!(completions, 1);
    drop(events);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn frames_arrive_in_capture_order() {
    let controller = CaptureController::new();
    let depth_tags = Arc::new(Mutex::new(Vec::new()));
    let (tags, done) = (depth_tags.clone(), Arc::new(AtomicUsize::new(0)));
    let done_cb = done.clone();
    let callbacks = Callbacks::new(
        move |pair: FramePair| {
            let tag = pair.depth().depth_at(0, 0).unwrap();
            tags.lock().unwrap().push((pair.sequence, tag));
        },
        move |_| {
            done_cb.fetch_add(1, Ordering::SeqCst);
        },
    );
    let source = synthetic(SyntheticConfig {
        fail_after: Some(50),
        ..unpaced()
    });
    let mut session = controller.start(&small(60, 0), source, callbacks).unwrap();

    let outcome = session.pump_until_complete(Duration::from_secs(10));
    assert!(matches!(outcome, Some(Err(CaptureError::Device(_)))));

    let tags = depth_tags.lock().unwrap();
    assert_eq!(tags.len(), 50);
    for (i, (sequence, tag)) in tags.iter().enumerate() {
        assert_eq!(*sequence, i as u64 + 1);
        assert_eq!(*tag as u64, i as u64 + 1);
    }
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn throttle_spaces_acquisitions_and_deliveries() {
    let controller = CaptureController::new();
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let recorder = stamps.clone();
    let callbacks = Callbacks::new(
        move |pair: FramePair| {
            recorder
                .lock()
                .unwrap()
                .push((pair.captured_at(), Instant::now()));
        },
        |_| {},
    );
    let source = synthetic(SyntheticConfig {
        fail_after: Some(4),
        ..unpaced()
    });
    // 10 fps cap -> 100 ms between acquisitions. The consumer dispatches as
    // soon as it is woken, so deliveries keep roughly the same spacing.
    let mut session = controller.start(&small(90, 10), source, callbacks).unwrap();
    session.pump_until_complete(Duration::from_secs(10));

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 4);
    for pair in stamps.windows(2) {
        let (captured, delivered) = (pair[1].0 - pair[0].0, pair[1].1 - pair[0].1);
        assert!(captured >= Duration::from_millis(99), "captured {captured:?} apart");
        assert!(delivered >= Duration::from_millis(80), "delivered {delivered:?} apart");
    }
}

#[test]
fn invalid_options_complete_once_without_frames() {
    let controller = CaptureController::new();
    let (callbacks, log) = recording();
    let options = CaptureOptions {
        depth_width: 0,
        ..small(30, 0)
    };

    let mut session = controller
        .start(&options, synthetic(unpaced()), callbacks)
        .expect("start only fails when a session is already running");
    let outcome = session.pump_until_complete(Duration::from_secs(5));
    assert!(matches!(outcome, Some(Err(CaptureError::Configuration(_)))));
    assert_eq!(session.dispatch().frames, 0);

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        Event::Complete(Err(CaptureError::Configuration(_)))
    ));
    drop(events);
    assert_eq!(session.stats().frames_captured, 0);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn only_one_concurrent_start_wins() {
    let controller = Arc::new(CaptureController::new());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.start(
                    &small(30, 0),
                    synthetic(SyntheticConfig::default()),
                    Callbacks::new(|_| {}, |_| {}),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let mut winners: Vec<_> = results
        .into_iter()
        .filter_map(|result| match result {
            Ok(session) => Some(session),
            Err(err) => {
                assert_eq!(err, CaptureError::AlreadyRunning);
                None
            }
        })
        .collect();
    assert_eq!(winners.len(), 1);

    let mut session = winners.remove(0);
    assert_eq!(session.stop(), StopOutcome::Finished);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn end_to_end_vga_device_failure_after_five_frames() {
    let controller = CaptureController::new();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let (frame_log, done_log, size_log) = (log.clone(), log.clone(), sizes.clone());
    let callbacks = Callbacks::new(
        move |pair: FramePair| {
            size_log
                .lock()
                .unwrap()
                .push((pair.depth().data().len(), pair.color().data().len()));
            frame_log.lock().unwrap().push(Event::Frame(pair.sequence));
        },
        move |outcome| done_log.lock().unwrap().push(Event::Complete(outcome)),
    );

    let source = synthetic(SyntheticConfig {
        fail_after: Some(5),
        ..unpaced()
    });
    let mut session = controller
        .start(&CaptureOptions::default(), source, callbacks)
        .unwrap();
    let outcome = session.pump_until_complete(Duration::from_secs(10));
    assert!(matches!(outcome, Some(Err(CaptureError::Device(_)))));

    assert_eq!(frames_in(&log), vec![1, 2, 3, 4, 5]);
    let sizes = sizes.lock().unwrap();
    assert_eq!(sizes.len(), 5);
    for (depth_len, color_len) in sizes.iter() {
        assert_eq!(*depth_len, 640 * 480 * 2);
        assert_eq!(*color_len, 640 * 480 * 3);
    }
    assert!(matches!(
        log.lock().unwrap().last(),
        Some(Event::Complete(Err(CaptureError::Device(_))))
    ));
}

#[test]
fn rejected_stream_profile_delivers_configuration_error_only() {
    let controller = CaptureController::new();
    let (callbacks, log) = recording();
    let source = synthetic(SyntheticConfig {
        reject_config: Some("1280x720 depth not supported".to_string()),
        ..unpaced()
    });
    let mut session = controller.start(&small(30, 0), source, callbacks).unwrap();
    let outcome = session.pump_until_complete(Duration::from_secs(5));

    assert!(matches!(outcome, Some(Err(CaptureError::Configuration(_)))));
    assert!(frames_in(&log).is_empty());
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn acquisition_timeouts_are_retried_silently() {
    let controller = CaptureController::with_settings(SessionSettings {
        acquire_timeout: Duration::from_millis(50),
        stop_policy: StopPolicy::Wait(Duration::from_secs(5)),
    });
    let (callbacks, log) = recording();
    let source = synthetic(SyntheticConfig {
        stall_every: Some(2),
        fail_after: Some(6),
        ..unpaced()
    });
    let mut session = controller.start(&small(30, 0), source, callbacks).unwrap();
    let outcome = session.pump_until_complete(Duration::from_secs(10));

    // Stalls never end the session; only the device failure does.
    assert!(matches!(outcome, Some(Err(CaptureError::Device(_)))));
    assert_eq!(frames_in(&log), vec![1, 2, 3, 4, 5, 6]);
    let stats = session.stats();
    assert_eq!(stats.frames_captured, 6);
    assert_eq!(stats.frames_delivered, 6);
    assert!(stats.acquisition_timeouts >= 6);
}

#[test]
fn wake_hook_runs_when_deliveries_are_pending() {
    let controller = CaptureController::new();
    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = wakes.clone();
    let callbacks = Callbacks::new(|_| {}, |_| {}).with_wake_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let source = synthetic(SyntheticConfig {
        fail_after: Some(3),
        ..unpaced()
    });
    let mut session = controller.start(&small(30, 0), source, callbacks).unwrap();
    session.pump_until_complete(Duration::from_secs(5));
    assert!(wakes.load(Ordering::SeqCst) >= 1);
}

#[test]
fn stub_uri_source_streams_until_stopped() {
    let controller = CaptureController::new();
    let (callbacks, log) = recording();
    let source = CameraSource::from_uri("stub://bench").unwrap();
    let mut session = controller.start(&small(100, 0), source, callbacks).unwrap();
    assert_eq!(session.source(), "stub://bench");

    let deadline = Instant::now() + Duration::from_secs(5);
    while frames_in(&log).len() < 3 && Instant::now() < deadline {
        session.wait_readable(Duration::from_millis(50));
        session.dispatch();
    }
    assert!(frames_in(&log).len() >= 3);
    assert_eq!(session.stop(), StopOutcome::Finished);
    assert_eq!(session.outcome(), Some(&Ok(())));
}

#[test]
fn unknown_source_scheme_is_rejected() {
    assert!(CameraSource::from_uri("rtsp://camera").is_err());
}
