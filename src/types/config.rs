//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and environment variables; every
//! field has a default so an empty object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Environment override for `server.listen_addr`.
pub const ENV_LISTEN_ADDR: &str = "CATHETER_COMM_LISTEN_ADDR";
/// Environment override for `observability.log_level`.
pub const ENV_LOG_LEVEL: &str = "CATHETER_COMM_LOG_LEVEL";

/// Global service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Connection and protocol configuration.
    #[serde(default)]
    pub comm: CommConfig,
}

impl Config {
    /// Read a JSON config file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            self.server.listen_addr = addr;
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.observability.log_level = level;
        }
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.comm.validate()
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP bind address of the processing server.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// How inbound requests are handed to their handlers on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlerExecution {
    /// One worker per connection runs handlers strictly in arrival order.
    #[default]
    Sequential,
    /// Every request runs on its own task.
    Concurrent,
}

/// Connection and protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Maximum frame body size in bytes.
    pub max_frame_bytes: u32,

    /// Deadline applied to `send` calls that do not pass their own.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Upper bound on a single frame write. Slow peers are dropped.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Upper bound on establishing an outbound connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum concurrent accepted connections per server.
    pub max_connections: usize,

    /// Consecutive undecodable frames tolerated before the connection is closed.
    pub max_consecutive_protocol_errors: u32,

    /// Handler scheduling on each connection.
    pub handler_execution: HandlerExecution,
}

impl CommConfig {
    /// Reject values a connection or server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == 0 {
            return Err(Error::config("comm.max_frame_bytes must be positive"));
        }
        if self.max_connections == 0 {
            return Err(Error::config("comm.max_connections must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("comm.request_timeout must be positive"));
        }
        if self.write_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(Error::config("comm write/connect timeouts must be positive"));
        }
        Ok(())
    }
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            request_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_connections: 64,
            max_consecutive_protocol_errors: 8,
            handler_execution: HandlerExecution::Sequential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_request_timeout_is_ten_seconds() {
        let config = Config::default();
        assert_eq!(config.comm.request_timeout, Duration::from_secs(10));
        assert_eq!(config.comm.handler_execution, HandlerExecution::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"comm": {"request_timeout": "250ms", "handler_execution": "concurrent"}}"#,
        )
        .unwrap();
        assert_eq!(config.comm.request_timeout, Duration::from_millis(250));
        assert_eq!(config.comm.handler_execution, HandlerExecution::Concurrent);
        assert_eq!(config.comm.max_frame_bytes, 5 * 1024 * 1024);
        assert_eq!(config.server.listen_addr, "127.0.0.1:8000");
    }

    #[test]
    fn test_from_file_rejects_zero_frame_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"comm": {{"max_frame_bytes": 0}}}}"#).unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_frame_bytes"));
    }

    #[test]
    fn test_comm_config_validate_rejects_zero_limits() {
        let config = CommConfig {
            max_connections: 0,
            ..CommConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(CommConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file_missing_path() {
        let err = Config::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
