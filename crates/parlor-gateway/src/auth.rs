use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JWT claims accepted at the gateway. `sub` is the chat identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token carries no identity")]
    MissingIdentity,
}

/// Verifies a presented credential and says who the connection is.
///
/// The gateway calls this exactly once, at the HTTP upgrade, and trusts
/// the returned identity for the connection's whole lifetime. Nothing a
/// client sends later can change it.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<String, AuthError>;
}

/// HS256 JWT validation against a shared secret.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token for `identity`, expiring after `ttl`. Used by
    /// operator tooling and tests; the server itself never issues.
    pub fn issue(&self, identity: &str, ttl: chrono::Duration) -> Result<String> {
        let claims = Claims {
            sub: identity.to_string(),
            exp: (Utc::now() + ttl).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;

        let identity = data.claims.sub.trim();
        if identity.is_empty() {
            return Err(AuthError::MissingIdentity);
        }
        Ok(identity.to_string())
    }
}
