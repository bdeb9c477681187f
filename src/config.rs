//! Configuration management for Notegate.

use axum::http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::admission::WindowAlgorithm;
use crate::error::{NotegateError, Result};

/// Prefix for environment overrides, e.g. `NOTEGATE__ADMISSION__LIMIT=50`.
pub const ENV_PREFIX: &str = "NOTEGATE";

/// Main configuration for the Notegate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotegateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission gate configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Origins allowed to make cross-origin requests
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors_origins() -> Vec<String> {
    vec!["https://seen.red".to_string()]
}

impl ServerConfig {
    pub fn allowed_origins(&self) -> Result<Vec<HeaderValue>> {
        self.cors_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| {
                    NotegateError::Config(format!("invalid CORS origin {:?}: {}", origin, e))
                })
            })
            .collect()
    }
}

/// Admission gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests admitted per client per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Evict clients idle for longer than this (defaults to five windows)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Eviction sweep cadence (defaults to two windows)
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Admission estimate
    #[serde(default)]
    pub algorithm: WindowAlgorithm,

    /// Key clients by the forwarded header instead of the socket address.
    /// Only safe behind a proxy that always rewrites the header.
    #[serde(default)]
    pub trusted_proxy: bool,

    /// Header consulted in trusted-proxy mode
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            limit: default_limit(),
            idle_timeout_secs: None,
            sweep_interval_secs: None,
            algorithm: WindowAlgorithm::default(),
            trusted_proxy: false,
            forwarded_header: default_forwarded_header(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_limit() -> u64 {
    100
}

fn default_forwarded_header() -> String {
    "x-forwarded-for".to_string()
}

const DEFAULT_IDLE_WINDOWS: u64 = 5;
const DEFAULT_SWEEP_WINDOWS: u64 = 2;

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        let secs = self
            .idle_timeout_secs
            .unwrap_or(self.window_secs.saturating_mul(DEFAULT_IDLE_WINDOWS));
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .sweep_interval_secs
            .unwrap_or(self.window_secs.saturating_mul(DEFAULT_SWEEP_WINDOWS));
        Duration::from_secs(secs)
    }

    pub fn forwarded_header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.forwarded_header.as_bytes()).map_err(|e| {
            NotegateError::Config(format!(
                "invalid forwarded header {:?}: {}",
                self.forwarded_header, e
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(NotegateError::Config("admission.window_secs must be greater than 0".into()));
        }
        if self.limit == 0 {
            return Err(NotegateError::Config("admission.limit must be greater than 0".into()));
        }
        if self.sweep_interval().is_zero() {
            return Err(NotegateError::Config(
                "admission.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.idle_timeout() < self.window() {
            return Err(NotegateError::Config(
                "admission.idle_timeout_secs must be at least one window".into(),
            ));
        }
        self.forwarded_header_name()?;
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NotegateConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `NOTEGATE__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: NotegateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| NotegateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: NotegateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| NotegateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.server.allowed_origins()?;
        self.admission.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = NotegateConfig::default();

        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.admission.window(), Duration::from_secs(60));
        assert_eq!(config.admission.limit, 100);
        assert_eq!(config.admission.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.admission.sweep_interval(), Duration::from_secs(120));
        assert_eq!(config.admission.algorithm, WindowAlgorithm::Sliding);
        assert!(!config.admission.trusted_proxy);
        assert_eq!(config.server.cors_origins, vec!["https://seen.red"]);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
admission:
  window_secs: 10
  limit: 5
  sweep_interval_secs: 3
  algorithm: fixed
  trusted_proxy: true
  forwarded_header: X-Real-IP
logging:
  format: json
"#;
        let config = assert_ok!(NotegateConfig::from_yaml(yaml));

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.admission.limit, 5);
        assert_eq!(config.admission.idle_timeout(), Duration::from_secs(50));
        assert_eq!(config.admission.sweep_interval(), Duration::from_secs(3));
        assert_eq!(config.admission.algorithm, WindowAlgorithm::Fixed);
        assert_eq!(
            assert_ok!(config.admission.forwarded_header_name()).as_str(),
            "x-real-ip"
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = assert_ok!(NotegateConfig::from_yaml("admission:\n  limit: 7\n"));
        assert_eq!(config.admission.limit, 7);
        assert_eq!(config.admission.window_secs, 60);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            AdmissionConfig { window_secs: 0, ..Default::default() },
            AdmissionConfig { limit: 0, ..Default::default() },
            AdmissionConfig { sweep_interval_secs: Some(0), ..Default::default() },
            AdmissionConfig { idle_timeout_secs: Some(30), ..Default::default() },
            AdmissionConfig { forwarded_header: "bad header".into(), ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(NotegateError::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_cors_origins() {
        let config = assert_ok!(NotegateConfig::from_yaml(
            "server:\n  cors_origins: [\"https://a.example\", \"https://b.example\"]\n"
        ));
        assert_eq!(assert_ok!(config.server.allowed_origins()).len(), 2);

        assert_err!(NotegateConfig::from_yaml("server:\n  cors_origins: [\"bad\\norigin\"]\n"));
    }

    #[test]
    fn test_unknown_algorithm_is_an_error() {
        assert_err!(NotegateConfig::from_yaml("admission:\n  algorithm: leaky\n"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("notegate-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "admission:\n  window_secs: 30\n  limit: 12\n").unwrap();

        let config = NotegateConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = assert_ok!(config);
        assert_eq!(config.admission.window_secs, 30);
        assert_eq!(config.admission.limit, 12);
        assert_eq!(config.admission.sweep_interval(), Duration::from_secs(60));
    }
}
