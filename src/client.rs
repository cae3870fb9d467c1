// src/client.rs

use crate::config::ClientConfig;
use crate::error::OidcClientError;
use crate::grant::{
    request_tokens, ClientCredentials, Grant, SolutionUserCredentials, TokenRequestOptions, Tokens,
};
use crate::metadata::{resolve_metadata, ProviderMetadata};
use crate::multi_issuer::ProviderInfo;
use crate::signers::{fetch_signers, SignerKeySet, SignerStore};
use crate::token::{validate_token, ParsedToken, TokenExpectations};
use crate::transport::{HttpTransport, ReqwestTransport, RetryableTransport};
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

/// A client bound to a single OIDC provider.
///
/// Construction resolves the provider metadata and fetches the initial signer
/// set. After that the client only talks to the provider when asked to
/// acquire tokens or refresh its signers; validation is offline.
#[derive(Clone)]
pub struct OidcClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    metadata: ProviderMetadata,
    signers: SignerStore,
}

impl OidcClient {
    /// Creates a client using the default reqwest transport.
    pub async fn new(config: ClientConfig) -> Result<Self, OidcClientError> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.http)?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Creates a client over a caller-supplied transport. Requests are still
    /// retried according to `config.retry`.
    #[instrument(skip_all, fields(issuer = %config.issuer), err)]
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, OidcClientError> {
        config.validate()?;
        let transport: Arc<dyn HttpTransport> =
            Arc::new(RetryableTransport::new(transport, config.retry.clone()));

        let metadata = resolve_metadata(transport.as_ref(), &config.issuer).await?;
        let initial = fetch_signers(transport.as_ref(), &metadata.jwks_endpoint).await?;
        info!(keys = initial.len(), "OIDC client initialized.");

        let signers = SignerStore::new(metadata.jwks_endpoint.clone(), initial);
        Ok(Self { inner: Arc::new(Inner { config, transport, metadata, signers }) })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.inner.metadata
    }

    /// The configured issuer. Token `iss` claims must match it exactly;
    /// `metadata().issuer` keeps the spelling the provider declared.
    pub fn issuer(&self) -> &str {
        &self.inner.config.issuer
    }

    /// The currently published signer set.
    pub fn signers(&self) -> Arc<SignerKeySet> {
        self.inner.signers.snapshot()
    }

    /// This provider's issuer and current signers, for multi-issuer validation.
    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo::new(self.issuer(), self.signers())
    }

    /// Re-fetches the JWKS and atomically replaces the cached signer set.
    pub async fn refresh_signers(&self) -> Result<Arc<SignerKeySet>, OidcClientError> {
        self.inner.signers.refresh(self.inner.transport.as_ref()).await
    }

    pub async fn acquire_tokens_by_password(
        &self,
        username: &str,
        password: &str,
        options: &TokenRequestOptions,
    ) -> Result<Tokens, OidcClientError> {
        self.acquire(Grant::Password { username, password }, options).await
    }

    pub async fn acquire_tokens_by_solution_user_credentials(
        &self,
        credentials: &SolutionUserCredentials,
        options: &TokenRequestOptions,
    ) -> Result<Tokens, OidcClientError> {
        self.acquire(Grant::SolutionUser { credentials }, options).await
    }

    pub async fn acquire_tokens_by_refresh_token(
        &self,
        refresh_token: &str,
        options: &TokenRequestOptions,
    ) -> Result<Tokens, OidcClientError> {
        self.acquire(Grant::RefreshToken { refresh_token }, options).await
    }

    /// Redeems a code returned to `redirect_uri` by the authorization endpoint.
    pub async fn acquire_tokens_by_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Tokens, OidcClientError> {
        let grant = Grant::AuthorizationCode { code, redirect_uri };
        self.acquire(grant, &TokenRequestOptions::default()).await
    }

    /// Client credentials grant, authenticated with a signed client assertion.
    pub async fn acquire_tokens_by_client_credentials(
        &self,
        credentials: &ClientCredentials,
        options: &TokenRequestOptions,
    ) -> Result<Tokens, OidcClientError> {
        self.acquire(Grant::ClientCredentials { credentials }, options).await
    }

    async fn acquire(
        &self,
        grant: Grant<'_>,
        options: &TokenRequestOptions,
    ) -> Result<Tokens, OidcClientError> {
        let token_endpoint = &self.inner.metadata.token_endpoint;
        if token_endpoint.is_empty() {
            return Err(OidcClientError::metadata("provider does not advertise a token_endpoint"));
        }
        let client_id = self.inner.config.client_id.as_deref();
        let transport = self.inner.transport.as_ref();
        request_tokens(transport, token_endpoint, grant, client_id, options).await
    }

    /// The URI to send the user agent to for logging out of the provider.
    pub fn build_logout_request_uri(
        &self,
        id_token: &str,
        post_logout_redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<Url, OidcClientError> {
        self.inner.metadata.logout_request_uri(id_token, post_logout_redirect_uri, state)
    }

    pub fn validate_id_token(
        &self,
        raw: &str,
        nonce: Option<&str>,
    ) -> Result<ParsedToken, OidcClientError> {
        self.validate_token(raw, &TokenExpectations::id_token(nonce))
    }

    pub fn validate_access_token(
        &self,
        raw: &str,
        audience: Option<&str>,
        nonce: Option<&str>,
    ) -> Result<ParsedToken, OidcClientError> {
        self.validate_token(raw, &TokenExpectations::access_token(audience, nonce))
    }

    /// Validates `raw` against this provider's issuer and current signers.
    pub fn validate_token(
        &self,
        raw: &str,
        expectations: &TokenExpectations,
    ) -> Result<ParsedToken, OidcClientError> {
        let signers = self.signers();
        let tolerance = self.inner.config.clock_tolerance();
        validate_token(raw, self.issuer(), &signers, expectations, tolerance)
    }
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.inner.metadata.issuer)
            .field("token_endpoint", &self.inner.metadata.token_endpoint)
            .finish_non_exhaustive()
    }
}
