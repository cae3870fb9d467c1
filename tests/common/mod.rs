// tests/common/mod.rs
#![allow(dead_code)]

use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs8::DecodePrivateKey, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static TRACING: Once = Once::new();

/// Routes library logs to the test output; `RUST_LOG=debug` shows retry decisions.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

pub fn fixture_pem(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("fixture PEM should be readable")
}

pub fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

/// An RSA key pair that can mint tokens and publish itself as a JWK.
pub struct TestKey {
    pub kid: String,
    pub public_key: RsaPublicKey,
    encoding_key: EncodingKey,
}

impl TestKey {
    pub fn from_fixture(name: &str, kid: &str) -> Self {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(&fixture_pem(name)).expect("fixture should be PKCS#8");
        let der = private_key.to_pkcs1_der().unwrap();
        Self {
            kid: kid.to_string(),
            public_key: private_key.to_public_key(),
            encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
        }
    }

    pub fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": self.kid,
            "n": URL_SAFE_NO_PAD.encode(self.public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(self.public_key.e().to_bytes_be()),
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, Some(&self.kid))
    }

    /// Signs with a header that carries no `kid`.
    pub fn sign_without_kid(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, None)
    }

    pub fn sign_with_kid(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &self.encoding_key).unwrap()
    }
}

pub fn jwks(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Claims of a fresh bearer token of `token_class` issued by `issuer`.
pub fn claims(issuer: &str, token_class: &str) -> Value {
    let iat = now();
    json!({
        "iss": issuer,
        "sub": "alice@tenant.local",
        "aud": ["rp-client", issuer],
        "token_type": "Bearer",
        "token_class": token_class,
        "iat": iat,
        "exp": iat + 300,
        "sid": "session-1",
        "groups": ["tenant.local\\Users"],
    })
}

/// A mock OIDC provider serving discovery, JWKS and token endpoints under `/{tenant}`.
pub struct MockProvider {
    pub server: MockServer,
    pub tenant: String,
}

impl MockProvider {
    pub async fn start(tenant: &str) -> Self {
        init_tracing();
        Self { server: MockServer::start().await, tenant: tenant.to_string() }
    }

    pub fn issuer(&self) -> String {
        format!("{}/{}", self.server.uri(), self.tenant)
    }

    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.issuer(), name)
    }

    pub fn discovery_path(&self) -> String {
        format!("/{}/.well-known/openid-configuration", self.tenant)
    }

    pub fn jwks_path(&self) -> String {
        format!("/{}/jwks", self.tenant)
    }

    pub fn token_path(&self) -> String {
        format!("/{}/token", self.tenant)
    }

    /// A discovery document declaring `declared_issuer`.
    pub fn discovery_document(&self, declared_issuer: &str) -> Value {
        json!({
            "issuer": declared_issuer,
            "authorization_endpoint": self.endpoint("authorize"),
            "token_endpoint": self.endpoint("token"),
            "jwks_uri": self.endpoint("jwks"),
            "end_session_endpoint": self.endpoint("logout"),
            "id_token_signing_alg_values_supported": ["RS256"],
            "subject_types_supported": ["public"],
            "response_types_supported": ["code", "id_token"],
        })
    }

    pub async fn mount_discovery(&self, document: Value) {
        Mock::given(method("GET"))
            .and(path(self.discovery_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_jwks(&self, keys: &[&TestKey]) {
        Mock::given(method("GET"))
            .and(path(self.jwks_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .mount(&self.server)
            .await;
    }

    /// Mounts discovery and a JWKS containing `keys`.
    pub async fn mount_standard(&self, keys: &[&TestKey]) {
        self.mount_discovery(self.discovery_document(&self.issuer())).await;
        self.mount_jwks(keys).await;
    }
}

/// Client configuration with retries fast enough for tests.
pub fn fast_config(issuer: &str) -> nila_oidc_client::config::ClientConfig {
    let mut config = nila_oidc_client::config::ClientConfig::new(issuer);
    config.retry.interval_ms = 10;
    config
}
