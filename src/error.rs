// src/error.rs

use thiserror::Error;

/// Boxed cause carried by the wrapping error variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = OidcClientError> = std::result::Result<T, E>;

/// The primary error type for the `nila-oidc-client` library.
#[derive(Debug, Error)]
pub enum OidcClientError {
    /// The caller supplied an empty or otherwise unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// An error occurred inside the reqwest transport.
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A transport-level failure reported by a custom `HttpTransport`.
    #[error("Network error: {0}")]
    Network(String),

    /// The discovery document is missing, unreachable or fails validation.
    #[error("Provider metadata error: {message}")]
    Metadata {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The JSON Web Key Set could not be fetched or decoded.
    #[error("JWKS retrieval error: {message}")]
    JwksRetrieval {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The token exchange failed without a recognizable OAuth2 error body.
    #[error("Get token error: {message}")]
    GetToken {
        message: String,
        /// HTTP status of the token endpoint response, when one was received.
        status: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    /// A cryptographic key (PEM, JWK) is malformed.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The token is malformed, uses an unsupported algorithm or fails claim validation.
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// No candidate key verified the token signature.
    #[error("Token signature verification failed")]
    TokenInvalidSignature,

    /// The token `exp` claim lies further in the past than the clock tolerance.
    #[error("Token is expired")]
    TokenExpired,

    /// The token `iat` claim lies further in the future than the clock tolerance.
    #[error("Token is not yet valid")]
    TokenNotYetValid,

    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// `server_error`, or any error code this client does not recognize.
    #[error("server_error: {0}")]
    ServerError(String),
}

impl OidcClientError {
    pub(crate) fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata { message: message.into(), source: None }
    }

    pub(crate) fn metadata_caused_by(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Metadata { message: message.into(), source: Some(source.into()) }
    }

    pub(crate) fn jwks(message: impl Into<String>) -> Self {
        Self::JwksRetrieval { message: message.into(), source: None }
    }

    pub(crate) fn jwks_caused_by(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::JwksRetrieval { message: message.into(), source: Some(source.into()) }
    }

    pub(crate) fn get_token(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::GetToken { message: message.into(), status, source: None }
    }

    pub(crate) fn get_token_caused_by(
        message: impl Into<String>,
        status: Option<u16>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::GetToken { message: message.into(), status, source: Some(source.into()) }
    }

    pub(crate) fn token_invalid(message: impl Into<String>) -> Self {
        Self::TokenInvalid(message.into())
    }

    /// Maps an OAuth2 `error` code from the token endpoint to its typed variant.
    ///
    /// Unknown codes become [`OidcClientError::ServerError`] carrying the raw description.
    pub fn from_oauth_error(code: &str, description: impl Into<String>) -> Self {
        let description = description.into();
        match code {
            "invalid_request" => Self::InvalidRequest(description),
            "invalid_scope" => Self::InvalidScope(description),
            "invalid_grant" => Self::InvalidGrant(description),
            "invalid_client" => Self::InvalidClient(description),
            "unauthorized_client" => Self::UnauthorizedClient(description),
            "unsupported_response_type" => Self::UnsupportedResponseType(description),
            "unsupported_grant_type" => Self::UnsupportedGrantType(description),
            "access_denied" => Self::AccessDenied(description),
            _ => Self::ServerError(description),
        }
    }

    /// Whether the error is a transport failure the retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HttpError(_) | Self::Network(_))
    }

    /// Whether the error was produced from a token endpoint `error` code.
    pub fn is_server_error_family(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::InvalidScope(_)
                | Self::InvalidGrant(_)
                | Self::InvalidClient(_)
                | Self::UnauthorizedClient(_)
                | Self::UnsupportedResponseType(_)
                | Self::UnsupportedGrantType(_)
                | Self::AccessDenied(_)
                | Self::ServerError(_)
        )
    }
}
