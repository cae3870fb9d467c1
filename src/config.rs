// src/config.rs

use crate::error::OidcClientError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_CLOCK_TOLERANCE_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 2000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Controls how the retryable transport re-attempts failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Fixed delay between two attempts, in milliseconds.
    pub interval_ms: u64,
    /// When set, each delay is drawn uniformly from `[interval/2, interval*3/2]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Settings for the default reqwest-backed transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Path to an additional PEM-encoded root CA trusted for the provider's TLS endpoints.
    pub root_certificate_pem: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            root_certificate_pem: None,
        }
    }
}

/// The complete configuration of an [`OidcClient`](crate::client::OidcClient).
///
/// Built once, validated, and passed by value to the client constructor. It can
/// be deserialized from any serde format; omitted fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// The issuer of the OIDC provider, e.g. `https://sso.example.com/openidconnect/tenant`.
    pub issuer: String,
    /// Sent as `client_id` with every token request when present and non-empty.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Allowed clock skew when checking `exp` and `iat`.
    #[serde(default = "default_clock_tolerance_secs")]
    pub clock_tolerance_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_clock_tolerance_secs() -> u64 {
    DEFAULT_CLOCK_TOLERANCE_SECS
}

impl ClientConfig {
    /// Creates a configuration for `issuer` with every other setting at its default.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: None,
            clock_tolerance_secs: DEFAULT_CLOCK_TOLERANCE_SECS,
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
        }
    }

    pub fn clock_tolerance(&self) -> Duration {
        Duration::from_secs(self.clock_tolerance_secs)
    }

    /// Checks the invariants the client relies on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the issuer is empty or not an absolute
    /// http(s) URL, or if `retry.max_attempts` is zero.
    pub fn validate(&self) -> Result<(), OidcClientError> {
        if self.issuer.trim().is_empty() {
            return Err(OidcClientError::InvalidConfiguration(
                "issuer must not be empty".to_string(),
            ));
        }
        let url = Url::parse(&self.issuer)
            .map_err(|e| OidcClientError::InvalidUrl(format!("{}: {}", self.issuer, e)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(OidcClientError::InvalidConfiguration(format!(
                "issuer must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(OidcClientError::InvalidConfiguration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_fields_take_defaults() {
        let json = r#"{"issuer":"https://sso.example.com/openidconnect/t1"}"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, ClientConfig::new("https://sso.example.com/openidconnect/t1"));
        assert_eq!(config.clock_tolerance(), Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.interval(), Duration::from_millis(2000));
        assert!(!config.retry.jitter);
    }

    #[test]
    fn partial_retry_section_keeps_remaining_defaults() {
        let json = r#"{"issuer":"https://sso.example.com","retry":{"jitter":true}}"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert!(config.retry.jitter);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(matches!(
            ClientConfig::new("").validate(),
            Err(OidcClientError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ClientConfig::new("not a url").validate(),
            Err(OidcClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            ClientConfig::new("ftp://sso.example.com").validate(),
            Err(OidcClientError::InvalidConfiguration(_))
        ));

        let mut config = ClientConfig::new("https://sso.example.com");
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(OidcClientError::InvalidConfiguration(_))));
    }
}
