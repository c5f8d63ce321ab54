//! Configuration record for the load balancer.
//!
//! The record mirrors the YAML config file consumed by the binary. Durations
//! accept humantime strings (`10s`, `2m`). Every section except `frontends`
//! and `backends` has defaults, so a minimal config is just a listener port
//! and an origin list.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ErrorKind, LbError, Result};

/// Top-level configuration record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listener definitions, one per frontend port
    pub frontends: Vec<Frontend>,
    /// Origin URL list (absolute http/https URLs)
    pub backends: Vec<String>,
    #[serde(default)]
    pub healthcheck: HealthCheckConfig,
    /// TLS settings; when present, every frontend terminates TLS
    #[serde(default)]
    pub ssl: Option<SslConfig>,
    #[serde(default)]
    pub ratelimit: RateLimitSettings,
    #[serde(default)]
    pub circuitbreaker: CircuitBreakerSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Frontend {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            path: "/health".to_string(),
        }
    }
}

/// Client certificate requirement for TLS frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthMode {
    /// No client certificate is requested
    #[default]
    None,
    /// A client certificate is requested but connections without one are accepted
    Request,
    /// Connections without a valid client certificate are rejected
    Require,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SslConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// CA bundle used to verify client certificates
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub client_auth: ClientAuthMode,
}

/// Admission algorithm applied per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Sustained admission rate in requests per second
    pub rate: f64,
    /// Burst capacity (token bucket only)
    pub burst: f64,
    pub algorithm: RateLimitAlgorithm,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 100.0,
            burst: 100.0,
            algorithm: RateLimitAlgorithm::TokenBucket,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit trips
    pub threshold: u32,
    /// How long an open circuit waits before admitting a probe
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Consecutive successes required to close a half-open circuit
    pub max_half_open: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(30),
            max_half_open: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            LbError::wrap(
                ErrorKind::ConfigInvalid,
                format!("failed to read config file {}", path.display()),
                e,
            )
        })?;
        Self::from_yaml(&data)
    }

    /// Parses and validates a configuration from a YAML string.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(data)
            .map_err(|e| LbError::wrap(ErrorKind::ConfigInvalid, "failed to parse config file", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        if self.frontends.is_empty() {
            return Err(LbError::new(ErrorKind::ConfigInvalid, "no frontends configured"));
        }
        for frontend in &self.frontends {
            if frontend.port == 0 {
                return Err(LbError::new(ErrorKind::ConfigInvalid, "frontend port must be non-zero"));
            }
        }
        for backend in &self.backends {
            validate_origin_url(backend)?;
        }
        Ok(())
    }
}

/// Checks that an origin URL is absolute http or https.
///
/// Full parsing happens when the backend record is constructed; this is the
/// cheap structural check applied at config load and on admin input.
pub fn validate_origin_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(LbError::new(
            ErrorKind::ConfigInvalid,
            format!("invalid backend URL '{url}': must start with http:// or https://"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
frontends:
  - port: 8080
backends:
  - http://127.0.0.1:9001
"#;

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.frontends.len(), 1);
        assert_eq!(config.frontends[0].port, 8080);
        assert_eq!(config.backends, vec!["http://127.0.0.1:9001".to_string()]);

        assert_eq!(config.healthcheck.interval, Duration::from_secs(10));
        assert_eq!(config.healthcheck.timeout, Duration::from_secs(2));
        assert_eq!(config.healthcheck.path, "/health");

        assert!(config.ssl.is_none());
        assert!(!config.ratelimit.enabled);
        assert_eq!(config.circuitbreaker.threshold, 5);
        assert_eq!(config.circuitbreaker.timeout, Duration::from_secs(30));
        assert_eq!(config.circuitbreaker.max_half_open, 3);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_full_config_parses() {
        let yaml = r#"
frontends:
  - port: 8080
  - port: 8443
backends:
  - http://10.0.0.1:9001
  - https://origin.internal:9002
healthcheck:
  interval: 5s
  timeout: 500ms
  path: /healthz
ssl:
  cert_file: certs/server.pem
  key_file: certs/server.key
  ca_file: certs/ca.pem
  client_auth: require
ratelimit:
  enabled: true
  rate: 50
  burst: 100
  algorithm: sliding-window
circuitbreaker:
  threshold: 3
  timeout: 10s
  max_half_open: 2
metrics:
  enabled: false
  port: 9100
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.frontends.len(), 2);
        assert_eq!(config.healthcheck.interval, Duration::from_secs(5));
        assert_eq!(config.healthcheck.timeout, Duration::from_millis(500));
        assert_eq!(config.healthcheck.path, "/healthz");

        let ssl = config.ssl.unwrap();
        assert_eq!(ssl.client_auth, ClientAuthMode::Require);
        assert_eq!(ssl.ca_file, Some(PathBuf::from("certs/ca.pem")));

        assert!(config.ratelimit.enabled);
        assert_eq!(config.ratelimit.algorithm, RateLimitAlgorithm::SlidingWindow);
        assert_eq!(config.circuitbreaker.threshold, 3);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_no_frontends_rejected() {
        let yaml = r#"
frontends: []
backends:
  - http://127.0.0.1:9001
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_zero_port_rejected() {
        let yaml = r#"
frontends:
  - port: 0
backends: []
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_relative_backend_url_rejected() {
        let yaml = r#"
frontends:
  - port: 8080
backends:
  - 127.0.0.1:9001
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let err = Config::from_yaml("frontends: [").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.frontends[0].port, 8080);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_validate_origin_url() {
        assert!(validate_origin_url("http://127.0.0.1:9001").is_ok());
        assert!(validate_origin_url("https://origin.internal").is_ok());
        assert!(validate_origin_url("127.0.0.1:9001").is_err());
        assert!(validate_origin_url("ftp://origin").is_err());
    }
}
