use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "detect_log.db";
const DEFAULT_FRAMES_DIR: &str = "static/frames";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_PRESENCE_THRESHOLD_SECS: f64 = 5.0;
const DEFAULT_ALARM_COOLDOWN_SECS: f64 = 10.0;
const DEFAULT_STUB_LUMA_THRESHOLD: u8 = 128;

#[derive(Debug, Deserialize, Default)]
struct SentrydConfigFile {
    db_path: Option<String>,
    frames_dir: Option<String>,
    listen_addr: Option<String>,
    alert_url: Option<String>,
    presence_threshold_secs: Option<f64>,
    alarm_cooldown_secs: Option<f64>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    stub_luma_threshold: Option<u8>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SentrydConfig {
    pub db_path: String,
    pub frames_dir: String,
    pub listen_addr: String,
    /// Notifier endpoint. No alerts leave the process when unset.
    pub alert_url: Option<String>,
    pub presence_threshold: Duration,
    pub alarm_cooldown: Duration,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub stub_luma_threshold: u8,
    /// TTF file for annotation labels; boxes only when unset.
    pub font_path: Option<PathBuf>,
}

impl SentrydConfig {
    /// All settings are fixed at process start; there is no hot reload.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentrydConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            frames_dir: file
                .frames_dir
                .unwrap_or_else(|| DEFAULT_FRAMES_DIR.to_string()),
            listen_addr: file
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            alert_url: file.alert_url,
            presence_threshold: secs_f64(
                file.presence_threshold_secs
                    .unwrap_or(DEFAULT_PRESENCE_THRESHOLD_SECS),
            ),
            alarm_cooldown: secs_f64(
                file.alarm_cooldown_secs
                    .unwrap_or(DEFAULT_ALARM_COOLDOWN_SECS),
            ),
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_else(|| "stub".to_string()),
                stub_luma_threshold: detector
                    .stub_luma_threshold
                    .unwrap_or(DEFAULT_STUB_LUMA_THRESHOLD),
                font_path: detector.font_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SENTRY_LISTEN_ADDR") {
            if !addr.trim().is_empty() {
                self.listen_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("SENTRY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SENTRY_FRAMES_DIR") {
            if !dir.trim().is_empty() {
                self.frames_dir = dir;
            }
        }
        if let Ok(url) = std::env::var("SENTRY_ALERT_URL") {
            if !url.trim().is_empty() {
                self.alert_url = Some(url);
            }
        }
        if let Ok(path) = std::env::var("SENTRY_FONT_PATH") {
            if !path.trim().is_empty() {
                self.detector.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(secs) = std::env::var("SENTRY_PRESENCE_THRESHOLD_SECS") {
            let value: f64 = secs.parse().map_err(|_| {
                anyhow!("SENTRY_PRESENCE_THRESHOLD_SECS must be a number of seconds")
            })?;
            self.presence_threshold = secs_f64(value);
        }
        if let Ok(secs) = std::env::var("SENTRY_ALARM_COOLDOWN_SECS") {
            let value: f64 = secs
                .parse()
                .map_err(|_| anyhow!("SENTRY_ALARM_COOLDOWN_SECS must be a number of seconds"))?;
            self.alarm_cooldown = secs_f64(value);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.presence_threshold.is_zero() {
            return Err(anyhow!("presence threshold must be greater than zero"));
        }
        if self.alarm_cooldown.is_zero() {
            return Err(anyhow!("alarm cooldown must be greater than zero"));
        }
        Ok(())
    }
}

fn secs_f64(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

fn read_config_file(path: &Path) -> Result<SentrydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
