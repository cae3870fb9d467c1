// src/multi_issuer.rs

use crate::error::OidcClientError;
use crate::signers::SignerKeySet;
use crate::token::{validate_token, ParsedToken, TokenExpectations};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A trusted issuer together with the keys it signs with.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub issuer: String,
    pub signers: Arc<SignerKeySet>,
}

impl ProviderInfo {
    pub fn new(issuer: impl Into<String>, signers: Arc<SignerKeySet>) -> Self {
        Self { issuer: issuer.into(), signers }
    }
}

/// Validates `raw` against each provider in order and returns the first
/// success together with the index of the provider that accepted it.
///
/// Put the most likely issuer first; the result does not depend on the order
/// because a token names a single issuer.
///
/// # Errors
///
/// The error of the last provider tried, or `TokenInvalid` when `providers` is empty.
pub fn validate_against_any(
    raw: &str,
    expectations: &TokenExpectations,
    providers: &[ProviderInfo],
    clock_tolerance: Duration,
) -> Result<(ParsedToken, usize), OidcClientError> {
    let mut last_error = OidcClientError::token_invalid("no trusted issuers to validate against");
    for (index, provider) in providers.iter().enumerate() {
        let result =
            validate_token(raw, &provider.issuer, &provider.signers, expectations, clock_tolerance);
        match result {
            Ok(token) => {
                debug!(index, issuer = %provider.issuer, "Token accepted.");
                return Ok((token, index));
            }
            Err(e) => {
                debug!(
                    index,
                    issuer = %provider.issuer,
                    error = %e,
                    "Token rejected, trying next issuer."
                );
                last_error = e;
            }
        }
    }
    Err(last_error)
}
