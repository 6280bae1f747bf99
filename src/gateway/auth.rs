//! Caller authentication at the gateway edge.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::gateway::request::InboundRequest;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer credentials")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable identity used for rate limiting and logs. Never the raw token.
    pub id: String,
    /// Credential forwarded to upstream services.
    pub token: String,
}

pub trait Authenticator: Send + Sync + fmt::Debug {
    fn authenticate(&self, req: &InboundRequest) -> Result<Principal, AuthError>;
}

/// Accepts a fixed set of bearer tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashSet<String>,
}

impl StaticTokenAuthenticator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, req: &InboundRequest) -> Result<Principal, AuthError> {
        let token = req.bearer_token().ok_or(AuthError::MissingCredentials)?;
        if !self.tokens.contains(token) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Principal {
            id: principal_id(token),
            token: token.to_string(),
        })
    }
}

/// `tok_` plus the first 8 bytes of the token's SHA-256, hex encoded.
fn principal_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("tok_{hex}")
}

/// Paths that skip authentication. A trailing `*` matches a prefix.
#[derive(Debug, Clone, Default)]
pub struct PublicPaths {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl PublicPaths {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut paths = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match pattern.strip_suffix('*') {
                Some(prefix) => paths.prefixes.push(prefix.to_string()),
                None => {
                    paths.exact.insert(pattern.to_string());
                }
            }
        }
        paths
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.exact.contains(path) || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl From<&AuthConfig> for PublicPaths {
    fn from(config: &AuthConfig) -> Self {
        Self::new(&config.public_paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};

    fn req(auth: Option<&'static str>) -> InboundRequest {
        let mut headers = HeaderMap::new();
        if let Some(value) = auth {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        }
        InboundRequest::new(Method::GET, Uri::from_static("/x"), headers, Bytes::new(), None)
    }

    #[test]
    fn test_static_tokens() {
        let auth = StaticTokenAuthenticator::new(["secret"]);

        let principal = auth.authenticate(&req(Some("Bearer secret"))).unwrap();
        assert_eq!(principal.token, "secret");
        assert!(principal.id.starts_with("tok_"));
        assert_eq!(principal.id.len(), 4 + 16);
        assert!(!principal.id.contains("secret"));

        assert_eq!(
            auth.authenticate(&req(Some("Bearer wrong"))),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(auth.authenticate(&req(None)), Err(AuthError::MissingCredentials));
    }

    #[test]
    fn test_public_paths() {
        let paths = PublicPaths::new(["/health", "/docs/*"]);
        assert!(paths.is_public("/health"));
        assert!(!paths.is_public("/health/deep"));
        assert!(paths.is_public("/docs/index.html"));
        assert!(!paths.is_public("/api"));
    }
}
