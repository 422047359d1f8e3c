//! Configuration loading and validation for the checker runner

use checker::BackendKind;
use common::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub checks: CheckSettings,

    /// Per-kind endpoint overrides
    #[serde(default)]
    pub kinds: KindsSettings,

    /// Extra role to kind mappings, on top of the built-in ones
    #[serde(default)]
    pub roles: HashMap<String, BackendKind>,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.checks.validate()?;
        self.kinds.moray.validate()?;
        self.kinds.postgres.validate()?;
        self.kinds.redis.validate()?;
        self.kinds.zookeeper.validate()?;
        self.metrics.validate()?;

        if self.checks.interval < self.checks.deadline {
            let mut errors = ValidationErrors::new();
            errors.add("checks", ValidationError::new("interval_shorter_than_deadline"));
            return Err(errors);
        }
        Ok(())
    }
}

/// Scheduling of check rounds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CheckSettings {
    /// Harness deadline for one attempt
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_deadline")]
    pub deadline: Duration,

    /// Pause between rounds
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub interval: Duration,

    /// Host inventory written by the topology generator
    #[validate(length(min = 1))]
    pub hosts_file: String,
}

/// Overrides applied to every endpoint of one kind
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KindSettings {
    #[validate(range(min = 1))]
    pub port: Option<u16>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_connect_timeout")]
    pub connect_timeout: Option<Duration>,

    #[validate(length(min = 1))]
    pub username: Option<String>,

    pub password: Option<String>,

    /// Bucket for moray, database for postgres, znode for zookeeper
    #[validate(length(min = 1))]
    pub probe_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KindsSettings {
    pub moray: KindSettings,
    pub postgres: KindSettings,
    pub redis: KindSettings,
    pub zookeeper: KindSettings,
}

impl KindsSettings {
    pub fn for_kind(&self, kind: BackendKind) -> &KindSettings {
        match kind {
            BackendKind::Moray => &self.moray,
            BackendKind::Postgres => &self.postgres,
            BackendKind::Redis => &self.redis,
            BackendKind::Zookeeper => &self.zookeeper,
        }
    }
}

/// Metrics and status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(length(min = 1), custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    /// `json` for structured output, anything else for plain text
    pub format: Option<String>,
}

// Default implementations

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            interval: Duration::from_secs(30),
            hosts_file: "/opt/smartdc/madtom/etc/checker-hosts.json".to_string(),
        }
    }
}

impl Default for KindsSettings {
    fn default() -> Self {
        Self {
            moray: KindSettings::default(),
            postgres: KindSettings {
                username: Some("postgres".to_string()),
                ..KindSettings::default()
            },
            redis: KindSettings::default(),
            zookeeper: KindSettings::default(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "0.0.0.0:9102".to_string(),
        }
    }
}

// Custom validators

fn validate_deadline(deadline: &Duration) -> Result<(), ValidationError> {
    let millis = deadline.as_millis();
    if millis < 10 || millis > 300_000 {
        return Err(ValidationError::new("deadline_out_of_range"));
    }
    Ok(())
}

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    let secs = interval.as_secs();
    if secs < 1 || secs > 3600 {
        return Err(ValidationError::new("interval_out_of_range"));
    }
    Ok(())
}

fn validate_connect_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() || timeout.as_secs() > 60 {
        return Err(ValidationError::new("connect_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    if addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ValidationError::new("listen_addr_invalid"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound);
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/madtom/checker.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./checker.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/madtom/checker.yaml"))
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_name(self.logging.format.as_deref())
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }
}
