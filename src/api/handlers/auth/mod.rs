//! Auth endpoints: signup, login, refresh, federated login, `me`, and the
//! role probe routes that exercise the gate.

use std::sync::Arc;

use axum::{Extension, http::StatusCode, response::Json};

use crate::api::Sessions;
use crate::auth::Principal;
use crate::auth::error::AuthError;
use crate::auth::session::{ProvidedProfile, SignupProfile};
use crate::users::{User, find_by_id_or_fault};

pub(crate) mod types;

pub use types::{
    AuthResponse, FederatedRequest, LoginRequest, RefreshRequest, RoleProbeResponse, SignupRequest,
};

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses (
        (status = 201, description = "Account created, session issued", body = AuthResponse),
        (status = 400, description = "Invalid email, password, or name"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth",
)]
/// Register a local account and issue the first token pair.
pub async fn signup(
    sessions: Extension<Arc<Sessions>>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    body.validate()?;

    let pair = sessions
        .sign_up(SignupProfile {
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
        })
        .await?;

    let user = sessions.principal_from_token(&pair.access_token).await;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse::from_pair(pair, user)),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Session issued", body = AuthResponse),
        (status = 400, description = "Wrong credentials")
    ),
    tag = "auth",
)]
/// Authenticate with email and password.
///
/// Unknown email and wrong password get the same response, so the endpoint
/// does not leak which accounts exist.
pub async fn login(
    sessions: Extension<Arc<Sessions>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = sessions
        .validate_credentials(&body.email, &body.password)
        .await?
        .ok_or_else(|| AuthError::BadRequest("wrong credentials provided".to_string()))?;

    let pair = sessions
        .login(Principal::from(&user), body.remember_me)
        .await?;
    Ok(Json(AuthResponse::from_pair(pair, Some(user))))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "Rotated token pair", body = AuthResponse),
        (status = 401, description = "Presented secret does not match"),
        (status = 403, description = "Refresh token revoked or expired"),
        (status = 404, description = "Refresh token not found")
    ),
    tag = "auth",
)]
/// Exchange a refresh token for a fresh pair. Single use; reuse of an
/// already-rotated token is rejected.
pub async fn refresh(
    sessions: Extension<Arc<Sessions>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let pair = sessions
        .rotate_tokens(&body.refresh_token, body.refresh_token_id)
        .await?;
    Ok(Json(AuthResponse::from_pair(pair, None)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/federated",
    request_body = FederatedRequest,
    responses (
        (status = 200, description = "Session issued for the federated identity", body = AuthResponse),
        (status = 401, description = "Provider profile has no email")
    ),
    tag = "auth",
)]
/// Log in with an identity asserted by a federated provider, provisioning an
/// account on first sight and linking the identity to an existing account on
/// a matching email.
pub async fn federated(
    sessions: Extension<Arc<Sessions>>,
    Json(body): Json<FederatedRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let email = body
        .email
        .ok_or_else(|| AuthError::Unauthenticated("provider profile has no email".to_string()))?;

    let user = sessions
        .validate_provided_identity(ProvidedProfile {
            email,
            first_name: body.first_name,
            last_name: body.last_name,
            provider: body.provider,
            provider_id: body.provider_id,
        })
        .await?;

    let pair = sessions.login(Principal::from(&user), false).await?;
    Ok(Json(AuthResponse::from_pair(pair, Some(user))))
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses (
        (status = 200, description = "Account of the authenticated principal", body = User),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Return the account behind the presented access token.
pub async fn me(
    sessions: Extension<Arc<Sessions>>,
    principal: Extension<Principal>,
) -> Result<Json<User>, AuthError> {
    let user = find_by_id_or_fault(sessions.directory(), principal.id).await?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/v1/auth/test/admin",
    responses (
        (status = 200, description = "Caller holds the admin role", body = RoleProbeResponse),
        (status = 403, description = "Insufficient role")
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Probe route admitting admins only.
pub async fn admin_probe(principal: Extension<Principal>) -> Json<RoleProbeResponse> {
    probe_response(&principal)
}

#[utoipa::path(
    get,
    path = "/v1/auth/test/teacher",
    responses (
        (status = 200, description = "Caller holds the teacher or admin role", body = RoleProbeResponse),
        (status = 403, description = "Insufficient role")
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Probe route admitting teachers and admins.
pub async fn teacher_probe(principal: Extension<Principal>) -> Json<RoleProbeResponse> {
    probe_response(&principal)
}

#[utoipa::path(
    get,
    path = "/v1/auth/test/user",
    responses (
        (status = 200, description = "Caller holds the user role", body = RoleProbeResponse),
        (status = 403, description = "Insufficient role")
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Probe route admitting plain users only.
pub async fn user_probe(principal: Extension<Principal>) -> Json<RoleProbeResponse> {
    probe_response(&principal)
}

fn probe_response(principal: &Principal) -> Json<RoleProbeResponse> {
    Json(RoleProbeResponse {
        message: format!("access granted for role {}", principal.role.as_str()),
    })
}
