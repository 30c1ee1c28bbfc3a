//! Access token signing and verification (HS256).
//!
//! Access tokens are stateless and short-lived; they carry only the subject
//! id and role. There is no server-side record to revoke, the short expiry
//! bounds the blast radius of a leaked token.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::users::Role;

/// Claims embedded in every access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Verification failure, split so transports can tell an expired token from
/// a malformed or forged one. Both map to `Unauthenticated`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenVerifyError {
    #[error("access token expired")]
    Expired,
    #[error("access token invalid")]
    Invalid,
}

#[derive(Clone)]
pub struct TokenCodec {
    secret: SecretString,
    access_ttl: Duration,
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: SecretString, access_ttl_minutes: i64) -> Self {
        Self {
            secret,
            access_ttl: Duration::minutes(access_ttl_minutes),
        }
    }

    /// Sign an access token for the given principal.
    ///
    /// # Errors
    /// Returns an error on signing failure; callers surface it as an
    /// internal fault, never as a client error.
    pub fn sign(&self, subject: Uuid, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: subject,
            role,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .context("failed to sign access token")
    }

    /// Structural decode without signature or expiry checks.
    ///
    /// Only for best-effort extraction of who a token claims to belong to;
    /// never an authorization decision on its own.
    #[must_use]
    pub fn decode_unverified(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// Cryptographically verify signature and expiry.
    ///
    /// # Errors
    /// `Expired` for an out-of-date token, `Invalid` for anything else
    /// (malformed, bad signature, wrong algorithm).
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenVerifyError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => TokenVerifyError::Expired,
            _ => TokenVerifyError::Invalid,
        })
    }
}
