//! Configuration management for switchyard

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main switchyard configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Per-host connection pool configuration
    pub pool: PoolSettings,
    /// Pool cache expiration and cleanup
    pub cache: CacheSettings,
    /// Read/write splitting behavior
    pub splitting: SplittingSettings,
    /// Telemetry sink selection
    pub telemetry: TelemetrySettings,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Per-host pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum physical connections per pool key
    pub max_connections_per_host: usize,
    /// Timeout passed to each liveness check, in milliseconds
    pub validation_timeout_ms: u64,
    /// How many times an invalid pooled connection is evicted and replaced
    pub max_validation_retries: usize,
    /// Maximum time to wait for a free pool slot, in milliseconds
    pub acquire_timeout_ms: u64,
}

/// Pool cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Idle time after which an unused pool may be disposed, in seconds
    pub expiration_sec: u64,
    /// Interval between sweeps, in seconds
    pub cleanup_interval_sec: u64,
    /// Run sweeps on a background task instead of on caller operations
    pub background_cleanup: bool,
}

/// Reader selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderSelection {
    Random,
    RoundRobin,
}

/// Read/write splitting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplittingSettings {
    /// Strategy used to pick a reader host
    pub reader_selection: ReaderSelection,
    /// Re-pick a reader before every statement executed in read-only mode
    pub load_balance_readers: bool,
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Enable telemetry collection
    pub enabled: bool,
    /// Telemetry backend (none, tracing)
    pub backend: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections_per_host: 10,
            validation_timeout_ms: 3000,
            max_validation_retries: 10,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expiration_sec: 1800,
            cleanup_interval_sec: 600,
            background_cleanup: true,
        }
    }
}

impl Default for SplittingSettings {
    fn default() -> Self {
        Self {
            reader_selection: ReaderSelection::Random,
            load_balance_readers: false,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: "none".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl PoolSettings {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl CacheSettings {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_sec)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_sec)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_connections_per_host == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections_per_host must be greater than 0".to_string(),
            ));
        }

        if self.pool.validation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "validation_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.pool.max_validation_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_validation_retries must be greater than 0".to_string(),
            ));
        }

        if self.pool.acquire_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "acquire_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.cache.expiration_sec == 0 {
            return Err(ConfigError::ValidationError(
                "cache expiration_sec must be greater than 0".to_string(),
            ));
        }

        if self.cache.cleanup_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "cache cleanup_interval_sec must be greater than 0".to_string(),
            ));
        }

        match self.telemetry.backend.as_str() {
            "none" | "tracing" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid telemetry backend: {}",
                    self.telemetry.backend
                )))
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, profile: &str) -> Result<(), ConfigError> {
        let config = match profile {
            "default" => Config::default(),
            "load-balanced" => Config {
                splitting: SplittingSettings {
                    reader_selection: ReaderSelection::RoundRobin,
                    load_balance_readers: true,
                },
                telemetry: TelemetrySettings {
                    enabled: true,
                    backend: "tracing".to_string(),
                },
                ..Default::default()
            },
            _ => {
                return Err(ConfigError::ValidationError(
                    "Profile must be 'default' or 'load-balanced'".to_string(),
                ))
            }
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
