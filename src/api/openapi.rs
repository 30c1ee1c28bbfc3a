use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::handlers::{auth, health};
use crate::users::{Provider, Role, User};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::signup,
        auth::login,
        auth::refresh,
        auth::federated,
        auth::me,
        auth::admin_probe,
        auth::teacher_probe,
        auth::user_probe,
    ),
    components(schemas(
        health::Health,
        auth::SignupRequest,
        auth::LoginRequest,
        auth::RefreshRequest,
        auth::FederatedRequest,
        auth::AuthResponse,
        auth::RoleProbeResponse,
        User,
        Role,
        Provider,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Authentication and session lifecycle"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
