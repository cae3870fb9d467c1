// src/grant.rs

use crate::error::OidcClientError;
use crate::model::{TokenErrorResponse, TokenResponse};
use crate::transport::{HttpRequest, HttpTransport};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::{pkcs8::DecodePrivateKey, RsaPrivateKey};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, instrument, warn};
use url::Url;

pub const SOLUTION_USER_GRANT_TYPE: &str = "urn:vmware:grant_type:solution_user_credentials";
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 2 * 60;
const ASSERTION_ID_BYTES: usize = 32;

/// Tokens returned by a successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    /// Empty when the provider returned no ID token, as on some refresh grants.
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Lifetime of the access token in seconds; always positive.
    pub expires_in: i64,
}

/// Optional per-request fields. Empty values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequestOptions {
    /// Space-separated scopes, e.g. `openid offline_access`.
    pub scope: Option<String>,
    /// Request-tracing id forwarded to the provider.
    pub correlation_id: Option<String>,
}

/// A solution user's certificate identity and private key.
///
/// The certificate itself is not needed here, only its subject DN, which is
/// both issuer and subject of the assertion.
#[derive(Clone)]
pub struct SolutionUserCredentials {
    subject_dn: String,
    encoding_key: EncodingKey,
}

impl SolutionUserCredentials {
    /// Loads the private key from PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1
    /// (`BEGIN RSA PRIVATE KEY`) PEM text.
    pub fn from_pem(
        subject_dn: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self, OidcClientError> {
        let subject_dn = subject_dn.into();
        if subject_dn.is_empty() {
            return Err(OidcClientError::InvalidArgument(
                "certificate subject DN must not be empty".to_string(),
            ));
        }
        Ok(Self { subject_dn, encoding_key: signing_key_from_pem(private_key_pem)? })
    }

    /// Reads the PEM private key from `path`.
    pub fn from_pem_file(
        subject_dn: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, OidcClientError> {
        Self::from_pem(subject_dn, &read_pem(path.as_ref())?)
    }

    pub fn subject_dn(&self) -> &str {
        &self.subject_dn
    }
}

impl std::fmt::Debug for SolutionUserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionUserCredentials")
            .field("subject_dn", &self.subject_dn)
            .finish_non_exhaustive()
    }
}

/// A registered client's id and the private key of its certificate, used to
/// authenticate with a `private_key_jwt` client assertion.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    encoding_key: EncodingKey,
}

impl ClientCredentials {
    pub fn from_pem(
        client_id: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self, OidcClientError> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(OidcClientError::InvalidArgument("client id must not be empty".to_string()));
        }
        Ok(Self { client_id, encoding_key: signing_key_from_pem(private_key_pem)? })
    }

    pub fn from_pem_file(
        client_id: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, OidcClientError> {
        Self::from_pem(client_id, &read_pem(path.as_ref())?)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

fn signing_key_from_pem(private_key_pem: &str) -> Result<EncodingKey, OidcClientError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
        .map_err(|e| {
            OidcClientError::InvalidKeyFormat(format!("Failed to parse RSA private key PEM: {}", e))
        })?;

    // jsonwebtoken takes PKCS#1 DER most reliably.
    let pkcs1_der = private_key.to_pkcs1_der().map_err(|e| {
        OidcClientError::InvalidKeyFormat(format!("Failed to convert RSA key to PKCS#1 DER: {}", e))
    })?;
    Ok(EncodingKey::from_rsa_der(pkcs1_der.as_bytes()))
}

fn read_pem(path: &Path) -> Result<String, OidcClientError> {
    std::fs::read_to_string(path).map_err(|e| {
        OidcClientError::InvalidKeyFormat(format!(
            "Failed to read RSA private key file from {:?}: {}",
            path, e
        ))
    })
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    token_class: &'a str,
    token_type: &'a str,
    jti: String,
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Signs a two-minute bearer assertion whose issuer and subject are `subject`.
fn signed_assertion(
    token_class: &str,
    subject: &str,
    audience: &str,
    key: &EncodingKey,
) -> Result<String, OidcClientError> {
    let mut id = [0u8; ASSERTION_ID_BYTES];
    OsRng.fill_bytes(&mut id);

    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        token_class,
        token_type: "Bearer",
        jti: URL_SAFE_NO_PAD.encode(id),
        iss: subject,
        sub: subject,
        aud: audience,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    encode(&Header::new(Algorithm::RS256), &claims, key).map_err(|e| {
        OidcClientError::InvalidKeyFormat(format!("Failed to sign {}: {}", token_class, e))
    })
}

/// Builds the RS256-signed solution-user assertion for `token_endpoint`.
pub fn solution_user_assertion(
    credentials: &SolutionUserCredentials,
    token_endpoint: &str,
) -> Result<String, OidcClientError> {
    signed_assertion(
        "solution_assertion",
        &credentials.subject_dn,
        token_endpoint,
        &credentials.encoding_key,
    )
}

/// Builds the RS256-signed client assertion for `endpoint`.
pub fn client_assertion(
    credentials: &ClientCredentials,
    endpoint: &str,
) -> Result<String, OidcClientError> {
    signed_assertion(
        "client_assertion",
        &credentials.client_id,
        endpoint,
        &credentials.encoding_key,
    )
}

/// The grant-specific parameters of a token request.
pub enum Grant<'a> {
    Password { username: &'a str, password: &'a str },
    SolutionUser { credentials: &'a SolutionUserCredentials },
    RefreshToken { refresh_token: &'a str },
    AuthorizationCode { code: &'a str, redirect_uri: &'a str },
    ClientCredentials { credentials: &'a ClientCredentials },
}

fn require(value: &str, name: &str) -> Result<(), OidcClientError> {
    if value.is_empty() {
        return Err(OidcClientError::InvalidArgument(format!("{} must not be empty", name)));
    }
    Ok(())
}

impl Grant<'_> {
    fn name(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::SolutionUser { .. } => SOLUTION_USER_GRANT_TYPE,
            Grant::RefreshToken { .. } => "refresh_token",
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::ClientCredentials { .. } => "client_credentials",
        }
    }

    /// Form parameters for this grant, without the optional common fields.
    fn params(&self, token_endpoint: &str) -> Result<Vec<(&'static str, String)>, OidcClientError> {
        let mut params = vec![("grant_type", self.name().to_string())];
        match self {
            Grant::Password { username, password } => {
                require(username, "username")?;
                require(password, "password")?;
                params.push(("username", username.to_string()));
                params.push(("password", password.to_string()));
            }
            Grant::SolutionUser { credentials } => {
                let assertion = solution_user_assertion(credentials, token_endpoint)?;
                params.push(("solution_user_assertion", assertion));
            }
            Grant::RefreshToken { refresh_token } => {
                require(refresh_token, "refresh token")?;
                params.push(("refresh_token", refresh_token.to_string()));
            }
            Grant::AuthorizationCode { code, redirect_uri } => {
                require(code, "authorization code")?;
                require(redirect_uri, "redirect URI")?;
                // Sent as given; providers compare it byte for byte with the registered URI.
                Url::parse(redirect_uri).map_err(|e| {
                    OidcClientError::InvalidUrl(format!("redirect URI '{}': {}", redirect_uri, e))
                })?;
                params.push(("code", code.to_string()));
                params.push(("redirect_uri", redirect_uri.to_string()));
            }
            Grant::ClientCredentials { credentials } => {
                let assertion = client_assertion(credentials, token_endpoint)?;
                params.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                params.push(("client_assertion", assertion));
            }
        }
        Ok(params)
    }
}

/// Builds the form-encoded token request for `grant`.
pub(crate) fn build_token_request(
    token_endpoint: &str,
    grant: &Grant<'_>,
    client_id: Option<&str>,
    options: &TokenRequestOptions,
) -> Result<HttpRequest, OidcClientError> {
    let url = Url::parse(token_endpoint).map_err(|e| {
        OidcClientError::InvalidUrl(format!("token endpoint '{}': {}", token_endpoint, e))
    })?;

    let mut params = grant.params(token_endpoint)?;
    let optional = [
        ("scope", options.scope.as_deref()),
        ("client_id", client_id),
        ("correlation_id", options.correlation_id.as_deref()),
    ];
    for (name, value) in optional {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            params.push((name, value.to_string()));
        }
    }

    Ok(HttpRequest::post_form(url, params.iter().map(|(k, v)| (*k, v.as_str()))))
}

/// Executes `grant` against `token_endpoint` and interprets the response.
#[instrument(skip(transport, grant, options), fields(grant_type = grant.name()), err)]
pub async fn request_tokens(
    transport: &dyn HttpTransport,
    token_endpoint: &str,
    grant: Grant<'_>,
    client_id: Option<&str>,
    options: &TokenRequestOptions,
) -> Result<Tokens, OidcClientError> {
    let request = build_token_request(token_endpoint, &grant, client_id, options)?;
    debug!("Requesting tokens.");

    let response = transport
        .execute(request)
        .await
        .map_err(|e| OidcClientError::get_token_caused_by("token request failed", None, e))?;

    if response.status != 200 {
        return Err(error_from_response(response.status, &response.body));
    }

    let body: TokenResponse = serde_json::from_str(&response.body)
        .map_err(|e| {
            OidcClientError::get_token_caused_by("malformed token response", Some(200), e)
        })?;
    if body.access_token.is_empty() {
        return Err(OidcClientError::get_token("token response has no access_token", Some(200)));
    }
    if body.expires_in <= 0 {
        return Err(OidcClientError::get_token(
            format!("token response has non-positive expires_in {}", body.expires_in),
            Some(200),
        ));
    }

    debug!(token_type = %body.token_type, expires_in = body.expires_in, "Tokens acquired.");
    Ok(Tokens {
        access_token: body.access_token,
        id_token: body.id_token.unwrap_or_default(),
        refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
        token_type: body.token_type,
        expires_in: body.expires_in,
    })
}

/// Maps a non-200 token endpoint response to a typed error.
fn error_from_response(status: u16, body: &str) -> OidcClientError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(error) => {
            warn!(status, error = %error.error, "Token endpoint returned an error.");
            OidcClientError::from_oauth_error(&error.error, error.error_description)
        }
        Err(e) => {
            warn!(status, "Token endpoint returned an undecodable error body.");
            let message = format!("token endpoint returned HTTP {}", status);
            OidcClientError::get_token_caused_by(message, Some(status), e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_ENDPOINT: &str = "https://sso.example.com/openidconnect/token/t1";

    fn form(request: &HttpRequest) -> Vec<(String, String)> {
        url::form_urlencoded::parse(request.body.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    #[test]
    fn password_grant_requires_both_credentials() {
        let options = TokenRequestOptions::default();
        for (username, password) in [("", "secret"), ("alice", "")] {
            let grant = Grant::Password { username, password };
            assert!(matches!(
                build_token_request(TOKEN_ENDPOINT, &grant, None, &options),
                Err(OidcClientError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn optional_fields_are_sent_only_when_non_empty() {
        let grant = Grant::Password { username: "alice@t1", password: "secret" };

        let bare =
            build_token_request(TOKEN_ENDPOINT, &grant, Some(""), &TokenRequestOptions::default())
                .unwrap();
        let names: Vec<String> = form(&bare).into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["grant_type", "username", "password"]);

        let options = TokenRequestOptions {
            scope: Some("openid offline_access".into()),
            correlation_id: Some("req-42".into()),
        };
        let full = build_token_request(TOKEN_ENDPOINT, &grant, Some("client-1"), &options).unwrap();
        assert_eq!(
            form(&full),
            vec![
                ("grant_type".to_string(), "password".to_string()),
                ("username".to_string(), "alice@t1".to_string()),
                ("password".to_string(), "secret".to_string()),
                ("scope".to_string(), "openid offline_access".to_string()),
                ("client_id".to_string(), "client-1".to_string()),
                ("correlation_id".to_string(), "req-42".to_string()),
            ]
        );
    }

    #[test]
    fn refresh_grant_rejects_empty_token() {
        let grant = Grant::RefreshToken { refresh_token: "" };
        assert!(matches!(
            build_token_request(TOKEN_ENDPOINT, &grant, None, &TokenRequestOptions::default()),
            Err(OidcClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn error_bodies_map_to_typed_errors() {
        let body = r#"{"error":"invalid_grant","error_description":"bad password"}"#;
        let err = error_from_response(400, body);
        assert!(matches!(err, OidcClientError::InvalidGrant(d) if d == "bad password"));

        let err = error_from_response(400, r#"{"error":"slow_down","error_description":"later"}"#);
        assert!(matches!(err, OidcClientError::ServerError(d) if d == "later"));

        let err = error_from_response(502, "<html>bad gateway</html>");
        assert!(matches!(err, OidcClientError::GetToken { status: Some(502), .. }));
    }

    #[test]
    fn empty_subject_dn_is_rejected() {
        assert!(matches!(
            SolutionUserCredentials::from_pem("", "irrelevant"),
            Err(OidcClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            SolutionUserCredentials::from_pem("CN=svc", "not a pem"),
            Err(OidcClientError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn authorization_code_grant_sends_code_and_redirect_uri() {
        let options = TokenRequestOptions::default();
        let grant = Grant::AuthorizationCode {
            code: "c0de",
            redirect_uri: "https://rp.example.com",
        };
        let request = build_token_request(TOKEN_ENDPOINT, &grant, Some("rp-1"), &options).unwrap();
        assert_eq!(
            form(&request),
            vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("code".to_string(), "c0de".to_string()),
                ("redirect_uri".to_string(), "https://rp.example.com".to_string()),
                ("client_id".to_string(), "rp-1".to_string()),
            ]
        );

        let no_code = Grant::AuthorizationCode { code: "", redirect_uri: "https://rp.example/" };
        assert!(matches!(
            build_token_request(TOKEN_ENDPOINT, &no_code, None, &options),
            Err(OidcClientError::InvalidArgument(_))
        ));
        let relative = Grant::AuthorizationCode { code: "c0de", redirect_uri: "/callback" };
        assert!(matches!(
            build_token_request(TOKEN_ENDPOINT, &relative, None, &options),
            Err(OidcClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn empty_client_id_is_rejected() {
        assert!(matches!(
            ClientCredentials::from_pem("", "irrelevant"),
            Err(OidcClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            ClientCredentials::from_pem("rp-1", "not a pem"),
            Err(OidcClientError::InvalidKeyFormat(_))
        ));
    }
}
