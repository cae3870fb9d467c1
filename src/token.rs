// src/token.rs

use crate::error::OidcClientError;
use crate::model::JsonWebKeySet;
use crate::signers::{Signer, SignerKeySet};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const HOLDER_OF_KEY: &str = "hotk-pk";
const BEARER: &str = "Bearer";

/// The `token_type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Bearer,
    /// `hotk-pk`: the token is bound to the public key(s) in its `hotk` claim.
    HolderOfKey,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Bearer => BEARER,
            TokenType::HolderOfKey => HOLDER_OF_KEY,
        }
    }
}

/// The `token_class` claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClass {
    IdToken,
    AccessToken,
    RefreshToken,
    SolutionAssertion,
    ClientAssertion,
    Other(String),
}

impl TokenClass {
    pub fn as_str(&self) -> &str {
        match self {
            TokenClass::IdToken => "id_token",
            TokenClass::AccessToken => "access_token",
            TokenClass::RefreshToken => "refresh_token",
            TokenClass::SolutionAssertion => "solution_assertion",
            TokenClass::ClientAssertion => "client_assertion",
            TokenClass::Other(other) => other,
        }
    }

    fn from_claim(value: &str) -> Self {
        match value {
            "id_token" => TokenClass::IdToken,
            "access_token" => TokenClass::AccessToken,
            "refresh_token" => TokenClass::RefreshToken,
            "solution_assertion" => TokenClass::SolutionAssertion,
            "client_assertion" => TokenClass::ClientAssertion,
            other => TokenClass::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-side constraints checked after the token itself is found valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExpectations {
    pub token_class: TokenClass,
    /// When set, must appear in the token's `aud` list.
    pub audience: Option<String>,
    /// When set, must equal the token's `nonce` claim.
    pub nonce: Option<String>,
}

impl TokenExpectations {
    pub fn id_token(nonce: Option<&str>) -> Self {
        Self { token_class: TokenClass::IdToken, audience: None, nonce: nonce.map(str::to_string) }
    }

    pub fn access_token(audience: Option<&str>, nonce: Option<&str>) -> Self {
        Self {
            token_class: TokenClass::AccessToken,
            audience: audience.map(str::to_string),
            nonce: nonce.map(str::to_string),
        }
    }
}

/// A signature-verified token whose claims passed validation.
///
/// Values of this type only come out of [`validate_token`], so the accessors
/// never need to re-check anything.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    raw: String,
    kid: Option<String>,
    issuer: String,
    subject: String,
    audience: Vec<String>,
    token_type: TokenType,
    token_class: TokenClass,
    issued_at: DateTime<Utc>,
    expiration: DateTime<Utc>,
    nonce: Option<String>,
    session_id: Option<String>,
    groups: Option<Vec<String>>,
    holder_of_key: Option<JsonWebKeySet>,
    claims: Map<String, Value>,
}

impl ParsedToken {
    /// The compact serialization the token was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The `kid` header of the token, if it carried one.
    pub fn key_id(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Normalized `aud`; a single string audience becomes a one-element list.
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn token_class(&self) -> &TokenClass {
        &self.token_class
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// The `sid` claim.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn groups(&self) -> Option<&[String]> {
        self.groups.as_deref()
    }

    /// The `hotk` key set; always present for `hotk-pk` tokens.
    pub fn holder_of_key(&self) -> Option<&JsonWebKeySet> {
        self.holder_of_key.as_ref()
    }

    /// Looks up any claim by name, including ones without a typed accessor.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Every claim exactly as it appeared in the payload.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}

#[derive(Deserialize)]
struct JwsHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Parses `raw`, verifies its RS256 signature against `signers` and validates
/// its claims for `issuer`, then checks `expectations`.
///
/// `issuer` must be the issuer the signer set was fetched for; the `iss`
/// claim is compared to it exactly.
pub fn validate_token(
    raw: &str,
    issuer: &str,
    signers: &SignerKeySet,
    expectations: &TokenExpectations,
    clock_tolerance: Duration,
) -> Result<ParsedToken, OidcClientError> {
    validate_token_at(raw, issuer, signers, expectations, clock_tolerance, Utc::now().timestamp())
}

#[instrument(skip_all, err)]
pub(crate) fn validate_token_at(
    raw: &str,
    issuer: &str,
    signers: &SignerKeySet,
    expectations: &TokenExpectations,
    clock_tolerance: Duration,
    now: i64,
) -> Result<ParsedToken, OidcClientError> {
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() != 3 {
        return Err(OidcClientError::token_invalid(format!(
            "expected 3 dot-separated parts, found {}",
            parts.len()
        )));
    }

    let header_bytes = decode_segment(parts[0], "header")?;
    let header: JwsHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| OidcClientError::token_invalid(format!("malformed header: {}", e)))?;
    if header.alg != "RS256" {
        return Err(OidcClientError::token_invalid(format!(
            "unsupported algorithm '{}'",
            header.alg
        )));
    }
    let payload_bytes = decode_segment(parts[1], "payload")?;
    decode_segment(parts[2], "signature")?;

    let signer = verify_signature(parts, header.kid.as_deref(), signers)?;
    debug!(kid = %signer.kid(), "Token signature verified.");

    let claims: Map<String, Value> = serde_json::from_slice(&payload_bytes)
        .map_err(|e| {
            OidcClientError::token_invalid(format!("payload is not a JSON object: {}", e))
        })?;

    let token = normalize_claims(raw, header.kid, claims, issuer, clock_tolerance, now)?;
    check_expectations(&token, expectations)?;
    Ok(token)
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, OidcClientError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| {
            OidcClientError::token_invalid(format!("{} is not valid base64url: {}", name, e))
        })
}

/// Tries the candidate keys in set order and returns the first that verifies.
fn verify_signature<'a>(
    parts: Vec<&str>,
    kid: Option<&str>,
    signers: &'a SignerKeySet,
) -> Result<&'a Signer, OidcClientError> {
    let message = format!("{}.{}", parts[0], parts[1]);
    let signature = parts[2];

    let candidates: Vec<&Signer> = match kid {
        Some(kid) => signers.find(kid).collect(),
        None => signers.iter().collect(),
    };
    if candidates.is_empty() {
        debug!(kid = ?kid, "No candidate key for token.");
    }

    candidates
        .into_iter()
        .find(|signer| {
            let key = signer.decoding_key();
            jsonwebtoken::crypto::verify(signature, message.as_bytes(), key, Algorithm::RS256)
                .unwrap_or(false)
        })
        .ok_or(OidcClientError::TokenInvalidSignature)
}

fn normalize_claims(
    raw: &str,
    kid: Option<String>,
    claims: Map<String, Value>,
    issuer: &str,
    clock_tolerance: Duration,
    now: i64,
) -> Result<ParsedToken, OidcClientError> {
    let tolerance = i64::try_from(clock_tolerance.as_secs()).unwrap_or(i64::MAX);
    let exp = numeric_claim(&claims, "exp")?;
    let iat = numeric_claim(&claims, "iat")?;

    if now > exp.saturating_add(tolerance) {
        debug!(exp, now, "Token expired.");
        return Err(OidcClientError::TokenExpired);
    }
    if now < iat.saturating_sub(tolerance) {
        debug!(iat, now, "Token issued in the future.");
        return Err(OidcClientError::TokenNotYetValid);
    }

    let iss = required_string(&claims, "iss")?;
    if iss != issuer {
        return Err(OidcClientError::token_invalid(format!(
            "issuer mismatch: expected '{}', token has '{}'",
            issuer, iss
        )));
    }

    let token_type = match required_string(&claims, "token_type")? {
        BEARER => TokenType::Bearer,
        HOLDER_OF_KEY => TokenType::HolderOfKey,
        other => {
            return Err(OidcClientError::token_invalid(format!("unknown token_type '{}'", other)))
        }
    };
    let token_class = TokenClass::from_claim(required_string(&claims, "token_class")?);
    let subject = required_string(&claims, "sub")?.to_string();

    let holder_of_key = match token_type {
        TokenType::HolderOfKey => Some(holder_of_key_claim(&claims)?),
        TokenType::Bearer => None,
    };

    let audience = audience_claim(&claims)?;
    let nonce = optional_string(&claims, "nonce")?;
    let session_id = optional_string(&claims, "sid")?;
    let groups = match claims.get("groups") {
        None => None,
        Some(value) => Some(
            string_list(value).ok_or_else(|| {
                OidcClientError::token_invalid("groups must be an array of strings")
            })?,
        ),
    };

    Ok(ParsedToken {
        raw: raw.to_string(),
        kid,
        issuer: iss.to_string(),
        subject,
        audience,
        token_type,
        token_class,
        issued_at: timestamp(iat, "iat")?,
        expiration: timestamp(exp, "exp")?,
        nonce,
        session_id,
        groups,
        holder_of_key,
        claims,
    })
}

fn check_expectations(
    token: &ParsedToken,
    expectations: &TokenExpectations,
) -> Result<(), OidcClientError> {
    if token.token_class != expectations.token_class {
        return Err(OidcClientError::token_invalid(format!(
            "wrong token type used where another was expected: expected '{}', got '{}'",
            expectations.token_class, token.token_class
        )));
    }
    if let Some(expected) = &expectations.nonce {
        if token.nonce.as_deref() != Some(expected.as_str()) {
            return Err(OidcClientError::token_invalid("nonce mismatch"));
        }
    }
    if let Some(expected) = &expectations.audience {
        if !token.audience.iter().any(|aud| aud == expected) {
            return Err(OidcClientError::token_invalid(format!(
                "audience '{}' not in {:?}",
                expected, token.audience
            )));
        }
    }
    Ok(())
}

fn numeric_claim(claims: &Map<String, Value>, name: &str) -> Result<i64, OidcClientError> {
    match claims.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| OidcClientError::token_invalid(format!("{} is out of range", name))),
        Some(_) => Err(OidcClientError::token_invalid(format!("{} must be numeric", name))),
        None => Err(OidcClientError::token_invalid(format!("{} claim is missing", name))),
    }
}

fn timestamp(secs: i64, name: &str) -> Result<DateTime<Utc>, OidcClientError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| {
            OidcClientError::token_invalid(format!("{} is not a representable time", name))
        })
}

fn required_string<'a>(
    claims: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, OidcClientError> {
    match claims.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => {
            Err(OidcClientError::token_invalid(format!("{} claim is empty", name)))
        }
        Some(_) => Err(OidcClientError::token_invalid(format!("{} must be a string", name))),
        None => Err(OidcClientError::token_invalid(format!("{} claim is missing", name))),
    }
}

fn optional_string(
    claims: &Map<String, Value>,
    name: &str,
) -> Result<Option<String>, OidcClientError> {
    match claims.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(OidcClientError::token_invalid(format!("{} must be a string", name))),
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// `aud` may be a single string or an array of strings. Either way it must
/// name at least one audience.
fn audience_claim(claims: &Map<String, Value>) -> Result<Vec<String>, OidcClientError> {
    let audience = match claims.get("aud") {
        None => return Err(OidcClientError::token_invalid("aud claim is missing")),
        Some(Value::String(s)) => vec![s.clone()],
        Some(value) => string_list(value)
            .ok_or_else(|| {
                OidcClientError::token_invalid("aud must be a string or an array of strings")
            })?,
    };
    if audience.is_empty() || audience.iter().any(String::is_empty) {
        return Err(OidcClientError::token_invalid("aud claim is empty"));
    }
    Ok(audience)
}

fn holder_of_key_claim(claims: &Map<String, Value>) -> Result<JsonWebKeySet, OidcClientError> {
    let value = claims
        .get("hotk")
        .ok_or_else(|| {
            OidcClientError::token_invalid("hotk claim is required for hotk-pk tokens")
        })?;
    let jwks: JsonWebKeySet = serde_json::from_value(value.clone())
        .map_err(|e| OidcClientError::token_invalid(format!("hotk is not a JWK set: {}", e)))?;
    if jwks.keys.is_empty() {
        return Err(OidcClientError::token_invalid("hotk JWK set is empty"));
    }
    Ok(jwks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn base() -> Value {
        json!({
            "iss": "https://sso.example.com/openidconnect/t1",
            "sub": "alice@t1",
            "aud": "rp-1",
            "iat": 1_000,
            "exp": 2_000,
            "token_type": "Bearer",
            "token_class": "id_token",
        })
    }

    fn normalize(value: Value, now: i64) -> Result<ParsedToken, OidcClientError> {
        normalize_claims(
            "a.b.c",
            None,
            claims(value),
            "https://sso.example.com/openidconnect/t1",
            Duration::from_secs(60),
            now,
        )
    }

    #[test]
    fn string_and_array_audience_normalize_identically() {
        let single = normalize(base(), 1_500).unwrap();
        let mut as_array = base();
        as_array["aud"] = json!(["rp-1"]);
        let array = normalize(as_array, 1_500).unwrap();
        assert_eq!(single.audience(), array.audience());

        let expectations = TokenExpectations {
            token_class: TokenClass::IdToken,
            audience: Some("rp-1".into()),
            nonce: None,
        };
        assert!(check_expectations(&single, &expectations).is_ok());
        assert!(check_expectations(&array, &expectations).is_ok());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        assert!(normalize(base(), 2_060).is_ok());
        assert!(matches!(normalize(base(), 2_061), Err(OidcClientError::TokenExpired)));
        assert!(normalize(base(), 940).is_ok());
        assert!(matches!(normalize(base(), 939), Err(OidcClientError::TokenNotYetValid)));
    }

    #[test]
    fn fractional_timestamps_are_accepted() {
        let mut value = base();
        value["exp"] = json!(2_000.75);
        assert_eq!(normalize(value, 1_500).unwrap().expiration().timestamp(), 2_000);
    }

    #[test]
    fn required_claims_must_be_present_and_typed() {
        for (name, replacement) in [
            ("exp", json!("2000")),
            ("iat", Value::Null),
            ("sub", json!("")),
            ("token_type", json!("MAC")),
            ("token_class", json!(7)),
            ("aud", json!([])),
            ("aud", json!([1])),
            ("iss", json!("https://SSO.example.com/openidconnect/t1")),
        ] {
            let mut value = base();
            value[name] = replacement;
            assert!(
                matches!(normalize(value, 1_500), Err(OidcClientError::TokenInvalid(_))),
                "{} should be rejected",
                name
            );
        }
        let mut missing_aud = claims(base());
        missing_aud.remove("aud");
        assert!(matches!(
            normalize(Value::Object(missing_aud), 1_500),
            Err(OidcClientError::TokenInvalid(_))
        ));
    }

    #[test]
    fn optional_claims_are_type_checked() {
        let bad_values = [("nonce", json!(1)), ("sid", json!(["s"])), ("groups", json!("admins"))];
        for (name, bad) in bad_values {
            let mut value = base();
            value[name] = bad;
            assert!(matches!(normalize(value, 1_500), Err(OidcClientError::TokenInvalid(_))));
        }

        let mut value = base();
        value["nonce"] = json!("n-1");
        value["sid"] = json!("s-1");
        value["groups"] = json!(["t1\\Administrators", "t1\\Everyone"]);
        value["tenant"] = json!("t1");
        let token = normalize(value, 1_500).unwrap();
        assert_eq!(token.nonce(), Some("n-1"));
        assert_eq!(token.session_id(), Some("s-1"));
        assert_eq!(token.groups().map(|g| g.len()), Some(2));
        assert_eq!(token.claim("tenant"), Some(&json!("t1")));
        assert_eq!(token.claim("missing"), None);
    }

    #[test]
    fn holder_of_key_requires_non_empty_hotk() {
        let mut value = base();
        value["token_type"] = json!("hotk-pk");
        assert!(matches!(normalize(value.clone(), 1_500), Err(OidcClientError::TokenInvalid(_))));

        value["hotk"] = json!({ "keys": [] });
        assert!(matches!(normalize(value.clone(), 1_500), Err(OidcClientError::TokenInvalid(_))));

        value["hotk"] = json!({ "keys": [{ "kty": "RSA", "n": "AQAB", "e": "AQAB" }] });
        let token = normalize(value, 1_500).unwrap();
        assert_eq!(token.token_type(), TokenType::HolderOfKey);
        assert_eq!(token.holder_of_key().map(|k| k.keys.len()), Some(1));
    }

    #[test]
    fn expectations_check_class_nonce_and_audience() {
        let mut value = base();
        value["nonce"] = json!("n-1");
        value["aud"] = json!(["rp-1", "rs-2"]);
        let token = normalize(value, 1_500).unwrap();

        assert!(check_expectations(&token, &TokenExpectations::id_token(Some("n-1"))).is_ok());
        assert!(check_expectations(&token, &TokenExpectations::id_token(Some("n-2"))).is_err());
        assert!(check_expectations(&token, &TokenExpectations::access_token(None, None)).is_err());

        let mut wants_rs2 = TokenExpectations::id_token(None);
        wants_rs2.audience = Some("rs-2".into());
        assert!(check_expectations(&token, &wants_rs2).is_ok());
        wants_rs2.audience = Some("rs-3".into());
        assert!(matches!(
            check_expectations(&token, &wants_rs2),
            Err(OidcClientError::TokenInvalid(_))
        ));
    }

    #[test]
    fn structural_errors_are_token_invalid() {
        let signers = SignerKeySet::default();
        let expectations = TokenExpectations::id_token(None);
        let validate = |raw: &str| {
            let tolerance = Duration::from_secs(60);
            validate_token_at(raw, "https://sso.example.com", &signers, &expectations, tolerance, 0)
        };

        assert!(matches!(validate("only.two"), Err(OidcClientError::TokenInvalid(_))));
        assert!(matches!(validate("a.b.c.d"), Err(OidcClientError::TokenInvalid(_))));
        assert!(matches!(validate("!!.e30.c2ln"), Err(OidcClientError::TokenInvalid(_))));

        let hs256 = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let hs256_token = format!("{}.e30.c2ln", hs256);
        assert!(matches!(validate(&hs256_token), Err(OidcClientError::TokenInvalid(_))));

        let none = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let unsigned = format!("{}.e30.", none);
        assert!(matches!(validate(&unsigned), Err(OidcClientError::TokenInvalid(_))));

        let rs256 = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        assert!(matches!(
            validate(&format!("{}.e30.c2ln", rs256)),
            Err(OidcClientError::TokenInvalidSignature)
        ));
    }
}
