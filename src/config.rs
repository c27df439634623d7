use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static FACE_STORE_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_FACE_STORE_PREFIX").unwrap_or("/usr/local/etc/facegate"))
});

/// Environment variable overriding `service.key`.
pub const SERVICE_KEY_ENV: &str = "FACEGATE_SERVICE_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    pub verify: VerifyConfig,
    pub enroll: EnrollConfig,
    pub store: StoreConfig,
    pub service: ServiceConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// How long `start` waits for a first frame.
    pub startup_grace_ms: u64,
    /// Sleep between polls while no fresh frame is available.
    pub poll_interval_ms: u64,
    /// Sleep after a failed device read before retrying.
    pub retry_backoff_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            startup_grace_ms: 200,
            poll_interval_ms: 5,
            retry_backoff_ms: 50,
        }
    }
}

impl CameraConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    /// Minimum detector confidence for a face box.
    pub confidence: f32,
    pub embed_width: u32,
    pub embed_height: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: FACE_STORE_PREFIX.join("models/res10_ssd.onnx"),
            embedder: FACE_STORE_PREFIX.join("models/facenet.onnx"),
            confidence: 0.6,
            embed_width: 160,
            embed_height: 160,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Cosine similarity needed for a match.
    pub threshold: f32,
    /// Process every Nth frame.
    pub every: u32,
    pub timeout_s: f32,
    pub live_window_s: f32,
    pub move_px: f32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.55,
            every: 3,
            timeout_s: 10.0,
            live_window_s: 6.0,
            move_px: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollConfig {
    pub samples: usize,
    pub sleep_s: f32,
    /// Give up after this long. Unbounded when unset.
    pub timeout_s: Option<f32>,
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            samples: 20,
            sleep_s: 0.15,
            timeout_s: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: FACE_STORE_PREFIX.join("face_db.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Shared secret callers must present. Empty or unset disables the check.
    pub key: Option<String>,
}

impl ServiceConfig {
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        match self.key.as_deref() {
            None | Some("") => true,
            Some(expected) => presented == Some(expected),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle liveness sessions older than this are evicted.
    pub ttl_s: u64,
    pub capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_s: 30,
            capacity: 64,
        }
    }
}

/// Longest wait any configured or requested duration can ask for.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Seconds to a `Duration`, clamped to `[0, MAX_WAIT]`. NaN reads as zero.
pub fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0))
        .unwrap_or(MAX_WAIT)
        .min(MAX_WAIT)
}

/// `None` when the deadline is too far out for the clock to represent.
pub fn deadline_after(wait: Duration) -> Option<Instant> {
    Instant::now().checked_add(wait)
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        Config::default()
    };
    if let Ok(key) = std::env::var(SERVICE_KEY_ENV) {
        cfg.service.key = Some(key);
    }
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
