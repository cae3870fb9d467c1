// src/metadata.rs

use crate::error::OidcClientError;
use crate::model::OidcDiscoveryDocument;
use crate::transport::{HttpRequest, HttpTransport};
use tracing::{debug, instrument, warn};
use url::Url;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const REQUIRED_SIGNING_ALGORITHM: &str = "RS256";

/// Validated provider metadata. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_endpoint: String,
    /// `end_session_endpoint`; empty when the provider does not advertise one.
    pub logout_endpoint: String,
    pub supported_signing_algorithms: Vec<String>,
    pub supported_subject_types: Vec<String>,
    pub supported_response_types: Vec<String>,
}

impl ProviderMetadata {
    /// Checks a discovery document against the issuer it was requested for.
    ///
    /// The issuer comparison ignores ASCII case; everything else must be
    /// present and RS256 must be among the signing algorithms.
    pub fn from_document(
        issuer: &str,
        doc: OidcDiscoveryDocument,
    ) -> Result<Self, OidcClientError> {
        if !doc.issuer.eq_ignore_ascii_case(issuer) {
            return Err(OidcClientError::metadata(format!(
                "issuer mismatch: requested '{}', discovery document declares '{}'",
                issuer, doc.issuer
            )));
        }
        if doc.authorization_endpoint.is_empty() {
            return Err(OidcClientError::metadata("authorization_endpoint is missing"));
        }
        if doc.jwks_uri.is_empty() {
            return Err(OidcClientError::metadata("jwks_uri is missing"));
        }
        if !doc
            .id_token_signing_alg_values_supported
            .iter()
            .any(|alg| alg == REQUIRED_SIGNING_ALGORITHM)
        {
            return Err(OidcClientError::metadata(format!(
                "{} is not among the supported signing algorithms {:?}",
                REQUIRED_SIGNING_ALGORITHM, doc.id_token_signing_alg_values_supported
            )));
        }

        Ok(Self {
            issuer: doc.issuer,
            authorization_endpoint: doc.authorization_endpoint,
            token_endpoint: doc.token_endpoint,
            jwks_endpoint: doc.jwks_uri,
            logout_endpoint: doc.end_session_endpoint,
            supported_signing_algorithms: doc.id_token_signing_alg_values_supported,
            supported_subject_types: doc.subject_types_supported,
            supported_response_types: doc.response_types_supported,
        })
    }

    /// Builds the RP-initiated logout URI on `logout_endpoint`.
    ///
    /// `state`, when non-empty, comes back to `post_logout_redirect_uri`
    /// unchanged.
    pub fn logout_request_uri(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<Url, OidcClientError> {
        if self.logout_endpoint.is_empty() {
            return Err(OidcClientError::metadata(
                "provider does not advertise an end_session_endpoint",
            ));
        }
        if id_token_hint.is_empty() {
            return Err(OidcClientError::InvalidArgument(
                "id token hint must not be empty".to_string(),
            ));
        }
        Url::parse(post_logout_redirect_uri).map_err(|e| {
            OidcClientError::InvalidUrl(format!(
                "post logout redirect URI '{}': {}",
                post_logout_redirect_uri, e
            ))
        })?;

        let mut uri = Url::parse(&self.logout_endpoint).map_err(|e| {
            OidcClientError::InvalidUrl(format!(
                "end session endpoint '{}': {}",
                self.logout_endpoint, e
            ))
        })?;
        {
            let mut query = uri.query_pairs_mut();
            query.append_pair("id_token_hint", id_token_hint);
            query.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
            if let Some(state) = state.filter(|s| !s.is_empty()) {
                query.append_pair("state", state);
            }
        }
        Ok(uri)
    }
}

/// Builds `{issuer}/.well-known/openid-configuration`, tolerating a trailing slash on the issuer.
pub fn discovery_url(issuer: &str) -> Result<Url, OidcClientError> {
    let url = format!("{}/{}", issuer.trim_end_matches('/'), DISCOVERY_PATH);
    Url::parse(&url).map_err(|e| OidcClientError::InvalidUrl(format!("{}: {}", url, e)))
}

/// Fetches and validates the discovery document of `issuer`.
///
/// # Errors
///
/// Every failure, including transport errors and non-2xx responses, is
/// reported as [`OidcClientError::Metadata`].
#[instrument(skip(transport), err)]
pub async fn resolve_metadata(
    transport: &dyn HttpTransport,
    issuer: &str,
) -> Result<ProviderMetadata, OidcClientError> {
    let url = discovery_url(issuer)
        .map_err(|e| OidcClientError::metadata_caused_by("invalid issuer", e))?;
    debug!("Performing OIDC discovery at: {}", url);

    let response = transport
        .execute(HttpRequest::get(url))
        .await
        .map_err(|e| OidcClientError::metadata_caused_by("discovery request failed", e))?;

    if !response.is_success() {
        warn!(status = response.status, "Discovery endpoint returned an error status.");
        return Err(OidcClientError::metadata(format!(
            "discovery endpoint returned HTTP {}",
            response.status
        )));
    }

    let doc: OidcDiscoveryDocument = serde_json::from_str(&response.body)
        .map_err(|e| OidcClientError::metadata_caused_by("malformed discovery document", e))?;

    let metadata = ProviderMetadata::from_document(issuer, doc)?;
    debug!(
        jwks_uri = %metadata.jwks_endpoint,
        token_endpoint = %metadata.token_endpoint,
        "Discovered provider metadata."
    );
    Ok(metadata)
}
