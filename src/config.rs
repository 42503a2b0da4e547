//! Gateway configuration with sensible defaults.
//!
//! [`GatewayConfig`] controls the upstream SearXNG instance, the listen
//! port, cache lifetimes, and the screenshot asset directory. Defaults can
//! be overridden from the environment (`SEARXNG_INSTANCE_URL`, `PORT`).

use crate::error::GatewayError;
use std::path::PathBuf;
use std::time::Duration;

/// Default SearXNG instance when `SEARXNG_INSTANCE_URL` is unset.
pub const DEFAULT_SEARXNG_URL: &str = "http://localhost:8080";

/// Default listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 1912;

/// Configuration for the gateway process.
///
/// Use [`Default::default()`] for sensible defaults, [`GatewayConfig::from_env`]
/// to pick up environment overrides, or construct with field overrides.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the upstream SearXNG instance.
    pub searxng_url: String,
    /// Port the HTTP surface listens on.
    pub port: u16,
    /// How long a cached search response counts as fresh.
    pub cache_valid_for: Duration,
    /// How long a cached search response is retained (stale but usable).
    pub cache_retained_for: Duration,
    /// Directory where screenshot assets are written.
    pub screenshot_dir: PathBuf,
    /// How long screenshot assets are kept before the sweeper unlinks them.
    pub screenshot_retained_for: Duration,
    /// Default early-return deadline for the search pipeline.
    pub search_deadline: Duration,
    /// Custom User-Agent forwarded to the upstream and to scrapes.
    /// If `None`, a fixed desktop Chrome UA is used.
    pub user_agent: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            searxng_url: DEFAULT_SEARXNG_URL.to_owned(),
            port: DEFAULT_PORT,
            cache_valid_for: Duration::from_secs(3600),
            cache_retained_for: Duration::from_secs(7 * 24 * 3600),
            screenshot_dir: PathBuf::from("local-storage/instant-screenshots"),
            screenshot_retained_for: Duration::from_secs(48 * 3600),
            search_deadline: Duration::from_millis(15_000),
            user_agent: None,
        }
    }
}

impl GatewayConfig {
    /// Build a configuration from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SEARXNG_INSTANCE_URL") {
            if !url.trim().is_empty() {
                config.searxng_url = url;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse() {
                config.port = parsed;
            }
        }
        config
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `searxng_url` must parse as an absolute http(s) URL
    /// - `cache_valid_for` must be shorter than `cache_retained_for`
    /// - `search_deadline` must be non-zero
    pub fn validate(&self) -> Result<(), GatewayError> {
        let parsed = url::Url::parse(&self.searxng_url)
            .map_err(|e| GatewayError::Config(format!("searxng_url is not a URL: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(GatewayError::Config(
                "searxng_url must use http or https".into(),
            ));
        }
        if self.cache_valid_for >= self.cache_retained_for {
            return Err(GatewayError::Config(
                "cache_valid_for must be shorter than cache_retained_for".into(),
            ));
        }
        if self.search_deadline.is_zero() {
            return Err(GatewayError::Config(
                "search_deadline must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.searxng_url, "http://localhost:8080");
        assert_eq!(config.port, 1912);
        assert_eq!(config.cache_valid_for, Duration::from_secs(3600));
        assert_eq!(config.cache_retained_for, Duration::from_secs(604_800));
        assert_eq!(config.search_deadline, Duration::from_millis(15_000));
        assert!(config.user_agent.is_none());
    }

    #[test]
    fn valid_config_passes_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_url_upstream_rejected() {
        let config = GatewayConfig {
            searxng_url: "not a url".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("searxng_url"));
    }

    #[test]
    fn non_http_upstream_rejected() {
        let config = GatewayConfig {
            searxng_url: "ftp://example.com".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn inverted_cache_lifetimes_rejected() {
        let config = GatewayConfig {
            cache_valid_for: Duration::from_secs(10),
            cache_retained_for: Duration::from_secs(5),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache_valid_for"));
    }

    #[test]
    fn zero_deadline_rejected() {
        let config = GatewayConfig {
            search_deadline: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search_deadline"));
    }
}
