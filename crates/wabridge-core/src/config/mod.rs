mod defaults;


use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::GatewayError;
use defaults::*;

pub use defaults::{DEFAULT_BACKEND_URL, MAX_INBOUND_MEDIA_BYTES};

/// Top-level wabridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long `POST /registerwhatsapp` waits for the first pairing outcome.
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            registration_timeout_secs: default_registration_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

/// Backend API the gateway reports to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://crm.example.com`. Empty = local placeholder.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_notify_path")]
    pub notify_path: String,
    #[serde(default = "default_phones_path")]
    pub phones_path: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            webhook_path: default_webhook_path(),
            notify_path: default_notify_path(),
            phones_path: default_phones_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    /// The configured base URL without a trailing slash, or the local
    /// placeholder (with a warning) when none is set.
    pub fn resolved_base_url(&self) -> String {
        let url = self.base_url.trim().trim_end_matches('/');
        if url.is_empty() {
            warn!("backend.base_url is not set, falling back to {DEFAULT_BACKEND_URL}");
            return DEFAULT_BACKEND_URL.to_string();
        }
        url.to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Where per-phone credentials, caches, and inbound media live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand(&self.data_dir))
    }
}

/// Logging sink settings. `dir` is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Resolve the log directory, failing when it is not configured.
    pub fn log_dir(&self) -> Result<PathBuf, GatewayError> {
        let dir = self.dir.trim();
        if dir.is_empty() {
            return Err(GatewayError::Config(
                "logging.dir is not set. Set it in config.toml or the LOG_DIR env var.".into(),
            ));
        }
        Ok(PathBuf::from(shellexpand(dir)))
    }
}

/// Fixed delays of the recovery loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_secs")]
    pub qr_timeout_secs: u64,
    #[serde(default = "default_recovery_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_bootstrap_attempts")]
    pub bootstrap_attempts: u32,
    #[serde(default = "default_recovery_secs")]
    pub bootstrap_retry_delay_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            qr_timeout_secs: default_recovery_secs(),
            retry_delay_secs: default_recovery_secs(),
            bootstrap_attempts: default_bootstrap_attempts(),
            bootstrap_retry_delay_secs: default_recovery_secs(),
        }
    }
}

impl RecoveryConfig {
    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn bootstrap_retry_delay(&self) -> Duration {
        Duration::from_secs(self.bootstrap_retry_delay_secs)
    }
}

/// Inbound media policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_max_inbound_bytes")]
    pub max_inbound_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_inbound_bytes: default_max_inbound_bytes(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, GatewayError> {
    let path = Path::new(path);
    if !path.exists() {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| GatewayError::Config(format!("failed to parse config: {}", e)))?;

    Ok(config)
}
