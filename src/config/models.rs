// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("invalid backend url {url:?}: {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("backend {0} is listed more than once")]
    DuplicateBackend(String),

    #[error("health check path must start with '/', got {0:?}")]
    InvalidHealthPath(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("rotation cursor {start} is out of range for a pool of {len}")]
    CursorOutOfRange { start: usize, len: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Ordered backend base URLs. Order is the rotation order.
    pub backends: Vec<String>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_urls()?;
        self.health_check.validate()?;
        Ok(())
    }

    /// Parse backend URLs in configured order, rejecting anything the pool
    /// could not serve.
    pub fn backend_urls(&self) -> Result<Vec<Url>, ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.backends.len());

        for raw in &self.backends {
            let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBackendUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            check_backend_url(&url)?;

            let key = url.as_str().trim_end_matches('/').to_string();
            if !seen.insert(key.clone()) {
                return Err(ConfigError::DuplicateBackend(key));
            }
            urls.push(url);
        }

        Ok(urls)
    }
}

/// A backend base URL must be http(s) with a host, and carry no query or
/// fragment since request paths are appended to it.
pub fn check_backend_url(url: &Url) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBackendUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("base url cannot carry a query or fragment"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Per-probe timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on probes in flight during one round.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath(self.path.clone()));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroValue("health_check.interval_secs"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("health_check.timeout_ms"));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroValue("health_check.max_concurrency"));
        }
        if self.timeout() > self.interval() {
            tracing::warn!(
                timeout_ms = self.timeout_ms,
                interval_secs = self.interval_secs,
                "health probe timeout exceeds the check interval; rounds will be delayed"
            );
        }
        Ok(())
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_interval_secs(),
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Time allowed for a backend to return response headers. Unset means no limit.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    80
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_max_concurrency() -> usize {
    16
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(backends: &[&str]) -> Config {
        Config {
            server: ServerConfig::default(),
            backends: backends.iter().map(|s| s.to_string()).collect(),
            health_check: HealthCheckConfig::default(),
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn empty_backend_list_is_fatal() {
        let err = config_with(&[]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NoBackends));
    }

    #[test]
    fn malformed_url_is_fatal() {
        let err = config_with(&["http://ok:1", "not a url"]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackendUrl { .. }));
    }

    #[test]
    fn duplicate_after_normalization_is_fatal() {
        let err = config_with(&["http://a:1", "http://a:1/"])
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateBackend(_)));
    }

    #[test]
    fn unusable_scheme_or_suffix_is_fatal() {
        for raw in ["ftp://x", "http://a:1/?q=1", "http://a:1/#top", "mailto:ops@example.com"] {
            let err = config_with(&[raw]).validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidBackendUrl { .. }),
                "{raw} should be rejected, got {err}"
            );
        }
    }

    #[test]
    fn urls_keep_configured_order() {
        let urls = config_with(&["http://c:3", "http://a:1", "http://b:2"])
            .backend_urls()
            .unwrap();
        let hosts: Vec<_> = urls.iter().filter_map(|u| u.host_str()).collect();
        assert_eq!(hosts, ["c", "a", "b"]);
    }

    #[test]
    fn health_check_bounds() {
        let mut hc = HealthCheckConfig::default();
        hc.path = "health".into();
        assert!(matches!(hc.validate(), Err(ConfigError::InvalidHealthPath(_))));

        let mut hc = HealthCheckConfig::default();
        hc.max_concurrency = 0;
        assert!(matches!(hc.validate(), Err(ConfigError::ZeroValue(_))));

        let mut hc = HealthCheckConfig::default();
        hc.interval_secs = 0;
        assert!(hc.validate().is_err());
    }

    #[test]
    fn zero_request_timeout_means_unbounded() {
        let proxy = ProxyConfig {
            request_timeout_secs: Some(0),
        };
        assert!(proxy.request_timeout().is_none());
    }
}
