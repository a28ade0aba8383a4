// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::infra::errors::{RentalError, Result};
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub billing: BillingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Granularity of incremental billing, copied onto each new session.
    pub default_interval_minutes: i64,
    /// Reject session requests the consumer could not pay one hour of.
    pub require_funds_at_request: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: 60,
            require_funds_at_request: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Sweep period. Independent of any session's billing interval.
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port_base: u16,
    pub port_span: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port_base: 5900,
            port_span: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Overrides the default `$GPURENT_HOME/data/gpurent.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(paths::db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// POST billing updates here. Outcomes are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| RentalError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.billing.default_interval_minutes <= 0 {
            return Err(RentalError::Config(
                "billing.default_interval_minutes must be positive".into(),
            ));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(RentalError::Config(
                "scheduler.sweep_interval_secs must be positive".into(),
            ));
        }
        if self.connection.port_span == 0 {
            return Err(RentalError::Config(
                "connection.port_span must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.billing.default_interval_minutes, 60);
        assert!(c.billing.require_funds_at_request);
        assert!(c.scheduler.enabled);
        assert_eq!(c.scheduler.sweep_interval_secs, 60);
        assert_eq!(c.connection.port_base, 5900);
        assert!(c.notifier.webhook_url.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.billing.default_interval_minutes, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[billing]
default_interval_minutes = 15
require_funds_at_request = false

[scheduler]
enabled = false
sweep_interval_secs = 30

[connection]
host = "10.1.2.3"
port_base = 6000
port_span = 10

[database]
path = "/tmp/rent.db"

[notifier]
webhook_url = "https://hooks.example.com/billing"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.billing.default_interval_minutes, 15);
        assert!(!config.billing.require_funds_at_request);
        assert!(!config.scheduler.enabled);
        assert_eq!(config.connection.host, "10.1.2.3");
        assert_eq!(
            config.database.resolved_path(),
            PathBuf::from("/tmp/rent.db")
        );
        assert_eq!(
            config.notifier.webhook_url.as_deref(),
            Some("https://hooks.example.com/billing")
        );
        assert_eq!(config.notifier.timeout_secs, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.billing.default_interval_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.scheduler.sweep_interval_secs,
            config.scheduler.sweep_interval_secs
        );
    }
}
