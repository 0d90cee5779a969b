use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::options::CaptureOptions;
use crate::session::{SessionSettings, StopPolicy, DEFAULT_ACQUIRE_TIMEOUT};

const DEFAULT_SOURCE: &str = "stub://camera";
const DEFAULT_STOP_GRACE_MS: u64 = 1000;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    source: Option<String>,
    capture: Option<CaptureOptions>,
    acquire_timeout_ms: Option<u64>,
    stop: Option<StopConfigFile>,
    dump: Option<DumpConfigFile>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StopConfigFile {
    policy: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DumpConfigFile {
    path: Option<PathBuf>,
}

/// Settings for the `framebridged` daemon.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Source URI (`stub://<name>` or `realsense://[serial]`).
    pub source: String,
    pub capture: CaptureOptions,
    pub session: SessionSettings,
    /// Write every delivered pair to this file as wire records.
    pub dump_path: Option<PathBuf>,
    pub health_log_interval: Duration,
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAMEBRIDGE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Result<Self> {
        let acquire_timeout = file
            .acquire_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT);
        let stop_policy = parse_stop_policy(
            file.stop.as_ref().and_then(|stop| stop.policy.as_deref()),
            file.stop.as_ref().and_then(|stop| stop.timeout_ms),
            acquire_timeout,
        )?;
        Ok(Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            capture: file.capture.unwrap_or_default(),
            session: SessionSettings {
                acquire_timeout,
                stop_policy,
            },
            dump_path: file.dump.and_then(|dump| dump.path),
            health_log_interval: Duration::from_secs(
                file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("FRAMEBRIDGE_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(fps) = std::env::var("FRAMEBRIDGE_FPS") {
            self.capture.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("FRAMEBRIDGE_FPS must be an integer"))?;
        }
        if let Ok(max_fps) = std::env::var("FRAMEBRIDGE_MAX_FPS") {
            self.capture.max_fps = max_fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("FRAMEBRIDGE_MAX_FPS must be an integer (0 = unthrottled)"))?;
        }
        if let Ok(timeout) = std::env::var("FRAMEBRIDGE_ACQUIRE_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("FRAMEBRIDGE_ACQUIRE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.session.acquire_timeout = Duration::from_millis(millis);
        }
        if let Ok(path) = std::env::var("FRAMEBRIDGE_DUMP_PATH") {
            if !path.trim().is_empty() {
                self.dump_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(policy) = std::env::var("FRAMEBRIDGE_STOP_POLICY") {
            let timeout_ms = match self.session.stop_policy {
                StopPolicy::Wait(timeout) => Some(timeout.as_millis() as u64),
                StopPolicy::Detach => None,
            };
            self.session.stop_policy =
                parse_stop_policy(Some(policy.trim()), timeout_ms, self.session.acquire_timeout)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.capture
            .validate()
            .map_err(|e| anyhow!("invalid capture options: {}", e))?;
        if self.session.acquire_timeout.is_zero() {
            return Err(anyhow!("acquire timeout must be greater than zero"));
        }
        if let StopPolicy::Wait(timeout) = self.session.stop_policy {
            if timeout < self.session.acquire_timeout {
                log::warn!(
                    "stop timeout {} ms is shorter than the acquire timeout {} ms; stop may give up early",
                    timeout.as_millis(),
                    self.session.acquire_timeout.as_millis()
                );
            }
        }
        if self.health_log_interval.is_zero() {
            return Err(anyhow!("health log interval must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_stop_policy(
    policy: Option<&str>,
    timeout_ms: Option<u64>,
    acquire_timeout: Duration,
) -> Result<StopPolicy> {
    match policy.map(str::to_ascii_lowercase).as_deref() {
        None | Some("wait") => Ok(StopPolicy::Wait(
            timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(acquire_timeout + Duration::from_millis(DEFAULT_STOP_GRACE_MS)),
        )),
        Some("detach") => Ok(StopPolicy::Detach),
        Some(other) => Err(anyhow!(
            "unknown stop policy '{}' (expected 'wait' or 'detach')",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
