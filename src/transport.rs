// src/transport.rs

use crate::config::{HttpConfig, RetryConfig};
use crate::error::OidcClientError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// A request as seen by an [`HttpTransport`].
///
/// Requests are cloned for every retry attempt, so they own their body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: vec![("accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }

    /// A `POST` with an `application/x-www-form-urlencoded` body built from `params`.
    pub fn post_form<'a, I>(url: Url, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![
                ("accept".to_string(), "application/json".to_string()),
                (
                    "content-type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
            ],
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// The pluggable HTTP layer used for discovery, JWKS and token requests.
///
/// An implementation reports transport-level failures (connection refused,
/// timeouts, TLS errors) as `Err`; every HTTP status, including errors, is an
/// `Ok(HttpResponse)`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, OidcClientError>;
}

/// The default transport, backed by a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client with the configured connect/request timeouts and optional extra root CA.
    pub fn new(config: &HttpConfig) -> Result<Self, OidcClientError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(path) = &config.root_certificate_pem {
            let pem = std::fs::read(path).map_err(|e| {
                OidcClientError::InvalidConfiguration(format!(
                    "Failed to read root certificate from {:?}: {}",
                    path, e
                ))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem)?;
            builder = builder.add_root_certificate(certificate);
        }

        Ok(Self { client: builder.build()? })
    }

    /// Wraps an already configured `reqwest::Client`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, OidcClientError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Retries requests on transport errors and 5xx responses.
///
/// A 2xx response is returned at once. Any other non-5xx status is returned at
/// once as well, so client errors are never repeated. After `max_attempts`
/// the outcome of the last attempt is returned, whatever it was.
#[derive(Clone)]
pub struct RetryableTransport {
    inner: Arc<dyn HttpTransport>,
    config: RetryConfig,
}

impl RetryableTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn delay(&self) -> Duration {
        let interval = self.config.interval();
        if !self.config.jitter || interval.is_zero() {
            return interval;
        }
        // Uniform over [interval/2, 3*interval/2].
        interval.mul_f64(rand::thread_rng().gen_range(0.5..=1.5))
    }
}

#[async_trait]
impl HttpTransport for RetryableTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, OidcClientError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(attempt, max_attempts, "Sending HTTP request.");
            let outcome = self.inner.execute(request.clone()).await;

            let retryable = match &outcome {
                Ok(response) if response.is_success() => false,
                Ok(response) if response.is_server_error() => {
                    warn!(attempt, status = response.status, "Server error response.");
                    true
                }
                Ok(response) => {
                    debug!(
                        attempt,
                        status = response.status,
                        "Non-retryable response, returning as-is."
                    );
                    false
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Transport error.");
                    true
                }
                Err(_) => false,
            };

            if !retryable {
                return outcome;
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, "Retries exhausted, returning last outcome.");
                return outcome;
            }

            let delay = self.delay();
            debug!(attempt, ?delay, "Retrying after delay.");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
