// src/lib.rs

//! OpenID Connect client core: provider discovery, signer key management,
//! token acquisition and offline RS256 token validation.

pub mod client;
pub mod config;
pub mod error;
pub mod grant;
pub mod metadata;
pub mod model;
pub mod multi_issuer;
pub mod signers;
pub mod token;
pub mod transport;

/// The public prelude for the `nila-oidc-client` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::client::OidcClient;
    pub use crate::config::{ClientConfig, HttpConfig, RetryConfig};
    pub use crate::error::{OidcClientError, Result};
    pub use crate::grant::{
        ClientCredentials, SolutionUserCredentials, TokenRequestOptions, Tokens,
    };
    pub use crate::metadata::ProviderMetadata;
    pub use crate::multi_issuer::{validate_against_any, ProviderInfo};
    pub use crate::signers::{SignerKeySet, SignerStore};
    pub use crate::token::{ParsedToken, TokenClass, TokenExpectations, TokenType};
    pub use crate::transport::{
        HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RetryableTransport,
    };
}
