//! framebridged - capture daemon for depth + color cameras
//!
//! This daemon:
//! 1. Loads configuration (FRAMEBRIDGE_CONFIG file + FRAMEBRIDGE_* env)
//! 2. Opens the configured source and starts a capture session
//! 3. Dispatches frame pairs on the main thread, optionally dumping them
//! 4. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::mpsc::{self, TryRecvError};
use std::time::{Duration, Instant};

use framebridge::{
    config::BridgeConfig, wire, CameraSource, Callbacks, CaptureController, FramePair,
    StopOutcome,
};

const DISPATCH_POLL: Duration = Duration::from_millis(100);

struct DumpSink {
    writer: BufWriter<File>,
    failed: bool,
}

impl DumpSink {
    fn create(path: &std::path::Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create dump file {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            failed: false,
        })
    }

    fn record(&mut self, pair: &FramePair) {
        if self.failed {
            return;
        }
        if let Err(err) = wire::write_pair(&mut self.writer, pair) {
            log::error!("dump write failed, disabling dump: {:#}", err);
            self.failed = true;
        }
    }
}

impl Drop for DumpSink {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            log::error!("failed to flush dump file: {}", err);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BridgeConfig::load()?;
    let source = CameraSource::from_uri(&config.source)?;
    let mut dump = match &config.dump_path {
        Some(path) => {
            log::info!("dumping frame pairs to {}", path.display());
            Some(DumpSink::create(path)?)
        }
        None => None,
    };

    let controller = CaptureController::with_settings(config.session);
    let callbacks = Callbacks::new(
        move |pair: FramePair| {
            let depth = pair.depth();
            let centre = depth.depth_at(depth.width() / 2, depth.height() / 2);
            log::debug!(
                "pair #{} depth {}x{} color {}x{} centre depth {:?}",
                pair.sequence,
                depth.width(),
                depth.height(),
                pair.color().width(),
                pair.color().height(),
                centre
            );
            if let Some(dump) = dump.as_mut() {
                dump.record(&pair);
            }
        },
        |outcome| match outcome {
            Ok(()) => log::info!("capture complete"),
            Err(err) => log::error!("capture ended with error: {}", err),
        },
    );
    let mut session = controller
        .start(&config.capture, source, callbacks)
        .map_err(|e| anyhow!("failed to start capture: {}", e))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "framebridged running on {} (Ctrl-C to stop)",
        session.source()
    );
    let mut last_health = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                log::info!("shutdown signal received, stopping capture...");
                match session.stop() {
                    StopOutcome::TimedOut => {
                        log::warn!("capture thread still busy; exiting without its completion")
                    }
                    outcome => log::debug!("stop outcome: {:?}", outcome),
                }
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        if session.wait_readable(DISPATCH_POLL) && session.dispatch().completed.is_some() {
            break;
        }

        if last_health.elapsed() >= config.health_log_interval {
            let stats = session.stats();
            log::info!(
                "health: captured={} delivered={} acquisition_timeouts={}",
                stats.frames_captured,
                stats.frames_delivered,
                stats.acquisition_timeouts
            );
            last_health = Instant::now();
        }
    }

    let stats = session.stats();
    log::info!(
        "session #{} summary: captured={} delivered={} acquisition_timeouts={}",
        session.id(),
        stats.frames_captured,
        stats.frames_delivered,
        stats.acquisition_timeouts
    );
    match session.outcome() {
        Some(Err(err)) => Err(anyhow!("capture failed: {}", err)),
        _ => Ok(()),
    }
}
