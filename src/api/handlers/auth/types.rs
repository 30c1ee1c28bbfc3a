//! Request/response types for auth endpoints, with edge validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::session::TokenPair;
use crate::users::{Provider, User};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
}

/// Provider profile as extracted from a completed federated handshake.
/// Some providers omit the email; that aborts the flow.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct FederatedRequest {
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub provider: Provider,
    pub provider_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RoleProbeResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl AuthResponse {
    pub(crate) fn from_pair(pair: TokenPair, user: Option<User>) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            refresh_token_id: pair.refresh_token_id,
            user,
        }
    }
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

impl SignupRequest {
    pub(super) fn validate(&self) -> Result<(), AuthError> {
        if !valid_email(self.email.trim()) {
            return Err(AuthError::BadRequest("invalid email".to_string()));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::BadRequest(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(AuthError::BadRequest("name must not be empty".to_string()));
        }
        Ok(())
    }
}
