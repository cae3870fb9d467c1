// src/signers.rs

use crate::error::OidcClientError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use crate::transport::{HttpRequest, HttpTransport};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// A single RSA verification key taken from a JWK Set.
#[derive(Clone)]
pub struct Signer {
    kid: String,
    decoding_key: DecodingKey,
    jwk: JsonWebKey,
}

impl Signer {
    /// Builds a signer from an RSA JWK. A key without `kid` is identified by
    /// its RFC 7638 thumbprint.
    pub fn from_jwk(jwk: JsonWebKey) -> Result<Self, OidcClientError> {
        if jwk.kty != "RSA" {
            return Err(OidcClientError::InvalidKeyFormat(format!(
                "unsupported key type '{}'",
                jwk.kty
            )));
        }
        let n = jwk.n.as_deref().ok_or_else(|| missing_component("n"))?;
        let e = jwk.e.as_deref().ok_or_else(|| missing_component("e"))?;
        let decoding_key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
            OidcClientError::InvalidKeyFormat(format!("invalid RSA components: {}", err))
        })?;

        let kid = match &jwk.kid {
            Some(kid) if !kid.is_empty() => kid.clone(),
            _ => rsa_thumbprint(n, e),
        };

        Ok(Self { kid, decoding_key, jwk })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    fn same_key(&self, other: &Signer) -> bool {
        self.kid == other.kid && self.jwk.n == other.jwk.n && self.jwk.e == other.jwk.e
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("kid", &self.kid).field("alg", &self.jwk.alg).finish()
    }
}

fn missing_component(name: &str) -> OidcClientError {
    OidcClientError::InvalidKeyFormat(format!("RSA key missing '{}' component", name))
}

/// RFC 7638 thumbprint of an RSA key: the base64url SHA-256 of its canonical JWK.
fn rsa_thumbprint(n: &str, e: &str) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical = json!({ "e": e, "kty": "RSA", "n": n }).to_string();
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// An ordered, immutable set of verification keys.
///
/// Sets are never mutated after construction. A refresh or a union produces a
/// new set.
#[derive(Debug, Clone, Default)]
pub struct SignerKeySet {
    signers: Vec<Arc<Signer>>,
}

impl SignerKeySet {
    /// Decodes the usable keys of a JWK Set.
    ///
    /// Non-RSA keys and keys whose `use` is something other than `sig` are
    /// skipped. A malformed RSA key fails the whole set.
    pub fn from_jwks(jwks: JsonWebKeySet) -> Result<Self, OidcClientError> {
        let mut set = Self::default();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                debug!(kty = %jwk.kty, kid = ?jwk.kid, "Skipping non-RSA key.");
                continue;
            }
            if jwk.use_purpose.as_deref().is_some_and(|u| u != "sig") {
                debug!(kid = ?jwk.kid, "Skipping key not intended for signatures.");
                continue;
            }
            set.insert(Arc::new(Signer::from_jwk(jwk)?));
        }
        Ok(set)
    }

    fn insert(&mut self, signer: Arc<Signer>) {
        if !self.signers.iter().any(|s| s.same_key(&signer)) {
            self.signers.push(signer);
        }
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signer> {
        self.signers.iter().map(|s| s.as_ref())
    }

    /// All keys published under `kid`. Distinct issuers may reuse a key id, so
    /// a combined set can hold more than one.
    pub fn find<'a, 'k>(&'a self, kid: &'k str) -> impl Iterator<Item = &'a Signer> + 'k
    where
        'a: 'k,
    {
        self.iter().filter(move |s| s.kid == kid)
    }

    /// Returns the union of this set and `others`, keeping first-seen order.
    /// Identical keys appear once.
    pub fn combine<'a, I>(&self, others: I) -> SignerKeySet
    where
        I: IntoIterator<Item = &'a SignerKeySet>,
    {
        let mut combined = self.clone();
        for other in others {
            for signer in &other.signers {
                combined.insert(Arc::clone(signer));
            }
        }
        combined
    }
}

/// Fetches and decodes the JWK Set published at `jwks_endpoint`.
///
/// # Errors
///
/// Transport failures, non-2xx statuses and decode failures are all
/// reported as [`OidcClientError::JwksRetrieval`].
#[instrument(skip(transport), err)]
pub async fn fetch_signers(
    transport: &dyn HttpTransport,
    jwks_endpoint: &str,
) -> Result<SignerKeySet, OidcClientError> {
    let url = Url::parse(jwks_endpoint)
        .map_err(|e| {
            OidcClientError::jwks_caused_by(format!("invalid JWKS endpoint '{}'", jwks_endpoint), e)
        })?;

    let response = transport
        .execute(HttpRequest::get(url))
        .await
        .map_err(|e| OidcClientError::jwks_caused_by("JWKS request failed", e))?;

    if !response.is_success() {
        return Err(OidcClientError::jwks(format!(
            "JWKS endpoint returned HTTP {}",
            response.status
        )));
    }

    let jwks: JsonWebKeySet = serde_json::from_str(&response.body)
        .map_err(|e| OidcClientError::jwks_caused_by("malformed JWK set", e))?;
    let published = jwks.keys.len();
    let set = SignerKeySet::from_jwks(jwks)
        .map_err(|e| OidcClientError::jwks_caused_by("unusable key in JWK set", e))?;

    info!("Successfully fetched {} keys ({} usable for RS256).", published, set.len());
    Ok(set)
}

/// Holds the current signer set of one issuer and swaps it on refresh.
///
/// Readers take a cheap `Arc` snapshot and never see a partially built set.
/// When refreshes overlap, the one started last wins: a refresh that
/// completes after a newer one has already been published is discarded.
pub struct SignerStore {
    jwks_endpoint: String,
    current: RwLock<Published>,
    next_ticket: AtomicU64,
}

struct Published {
    ticket: u64,
    signers: Arc<SignerKeySet>,
}

impl SignerStore {
    pub fn new(jwks_endpoint: impl Into<String>, initial: SignerKeySet) -> Self {
        Self {
            jwks_endpoint: jwks_endpoint.into(),
            current: RwLock::new(Published { ticket: 0, signers: Arc::new(initial) }),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn jwks_endpoint(&self) -> &str {
        &self.jwks_endpoint
    }

    /// The currently published set.
    pub fn snapshot(&self) -> Arc<SignerKeySet> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard.signers)
    }

    /// Re-fetches the key set and publishes it.
    ///
    /// Returns the set that is current once this refresh has finished, which
    /// is a newer one if a later refresh overtook this one.
    pub async fn refresh(
        &self,
        transport: &dyn HttpTransport,
    ) -> Result<Arc<SignerKeySet>, OidcClientError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let fetched = fetch_signers(transport, &self.jwks_endpoint).await?;
        Ok(self.publish(ticket, fetched))
    }

    fn publish(&self, ticket: u64, signers: SignerKeySet) -> Arc<SignerKeySet> {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if ticket > guard.ticket {
            debug!(ticket, keys = signers.len(), "Publishing refreshed signer set.");
            *guard = Published { ticket, signers: Arc::new(signers) };
        } else {
            warn!(
                ticket,
                current = guard.ticket,
                "Discarding signer set from an overtaken refresh."
            );
        }
        Arc::clone(&guard.signers)
    }
}
