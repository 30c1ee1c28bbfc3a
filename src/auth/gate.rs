//! Route authorization gate.
//!
//! A single middleware enforces the access policy for every route. Public
//! routes skip token verification entirely; everything else requires a valid
//! bearer token, and role-restricted routes additionally require one of the
//! listed roles. Routes not in the policy table default to requiring
//! authentication.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use crate::auth::Principal;
use crate::auth::error::AuthError;
use crate::auth::token::TokenCodec;
use crate::users::Role;

/// Access requirement for a route.
#[derive(Clone, Copy, Debug)]
pub enum Access {
    Public,
    Authenticated,
    Roles(&'static [Role]),
}

/// Exact-path policies. Paths under [`PUBLIC_PREFIXES`] are public as well.
const ROUTE_POLICIES: &[(&str, Access)] = &[
    ("/health", Access::Public),
    ("/v1/auth/signup", Access::Public),
    ("/v1/auth/login", Access::Public),
    ("/v1/auth/refresh", Access::Public),
    ("/v1/auth/federated", Access::Public),
    ("/v1/me", Access::Authenticated),
    ("/v1/auth/test/admin", Access::Roles(&[Role::Admin])),
    ("/v1/auth/test/teacher", Access::Roles(&[Role::Admin, Role::Teacher])),
    ("/v1/auth/test/user", Access::Roles(&[Role::User])),
];

const PUBLIC_PREFIXES: &[&str] = &["/docs", "/api-docs"];

#[must_use]
pub fn access_for(path: &str) -> Access {
    if let Some((_, access)) = ROUTE_POLICIES.iter().find(|(route, _)| *route == path) {
        return *access;
    }
    if PUBLIC_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return Access::Public;
    }
    Access::Authenticated
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthError::Unauthenticated("missing bearer token".to_string()))
}

/// Role check for an already-verified principal.
///
/// # Errors
/// `Forbidden` when the principal's role is not in the required set.
pub fn authorize_principal(access: Access, principal: Principal) -> Result<(), AuthError> {
    match access {
        Access::Public | Access::Authenticated => Ok(()),
        Access::Roles(required) => {
            if required.contains(&principal.role) {
                Ok(())
            } else {
                let required = required
                    .iter()
                    .map(|role| role.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(AuthError::Forbidden(format!(
                    "required roles: {required}, got: {}",
                    principal.role.as_str()
                )))
            }
        }
    }
}

/// Gate middleware. Admitted requests carry a [`Principal`] extension.
///
/// # Errors
/// `Unauthenticated` for a missing, expired, or invalid token; `Forbidden`
/// for a valid token with an insufficient role.
pub async fn authorize(
    axum::Extension(codec): axum::Extension<Arc<TokenCodec>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let access = access_for(request.uri().path());
    if matches!(access, Access::Public) {
        return Ok(next.run(request).await);
    }

    let token = bearer_token(request.headers())?;
    let claims = codec
        .verify(token)
        .map_err(|err| AuthError::Unauthenticated(err.to_string()))?;

    let principal = Principal {
        id: claims.sub,
        role: claims.role,
    };
    authorize_principal(access, principal)?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
