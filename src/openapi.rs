//! OpenAPI documentation configuration.
//!
//! Generates the OpenAPI specification with `utoipa` and serves it through
//! Swagger UI.

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Recast API",
        version = "1.0.0",
        description = "Multi-tenant AI content transformation backend.\n\n\
        ## Features\n\
        - Workspace-scoped documents, transformations, and presets\n\
        - Background transformation jobs with AI provider failover\n\
        - Refresh-token rotation with replay detection\n\
        - Real-time job and presence events on `/ws`\n\n\
        ## Authentication\n\
        1. Register or login to obtain an access/refresh pair\n\
        2. Include the access token in requests: `Authorization: Bearer <token>`\n\
        3. Rotate with `/api/auth/refresh` when the access token expires",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Authentication", description = "User authentication and token rotation"),
        (name = "Documents", description = "Document upload and management"),
        (name = "Transformations", description = "AI transformation jobs"),
        (name = "Presets", description = "Reusable transformation parameter templates")
    ),
    paths(
        crate::handlers::health::health_check_simple,
        crate::handlers::health::health_check,
        crate::handlers::health::ready_check,
        crate::handlers::health::live_check,

        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::refresh,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,

        crate::handlers::documents::upload_document,
        crate::handlers::documents::list_documents,
        crate::handlers::documents::get_document,
        crate::handlers::documents::delete_document,

        crate::handlers::transformations::create_transformation,
        crate::handlers::transformations::list_transformations,
        crate::handlers::transformations::get_transformation,
        crate::handlers::transformations::transformation_status,
        crate::handlers::transformations::cancel_transformation,
        crate::handlers::transformations::list_document_transformations,

        crate::handlers::presets::create_preset,
        crate::handlers::presets::list_presets,
        crate::handlers::presets::update_preset,
        crate::handlers::presets::delete_preset,
    ),
    components(
        schemas(
            crate::error::ApiError,

            crate::handlers::auth::RegisterRequest,
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::RefreshRequest,
            crate::handlers::auth::RegisterResponse,
            crate::handlers::auth::TokenResponse,
            crate::handlers::auth::UserResponse,
            crate::handlers::auth::WorkspaceResponse,
            crate::handlers::auth::CurrentUserResponse,

            crate::handlers::documents::DocumentResponse,
            crate::handlers::documents::DocumentEnvelope,
            crate::handlers::documents::DocumentListResponse,

            crate::handlers::transformations::CreateTransformationRequest,
            crate::handlers::transformations::TransformationResponse,
            crate::handlers::transformations::TransformationEnvelope,
            crate::handlers::transformations::TransformationListResponse,
            crate::handlers::transformations::TransformationStatusResponse,

            crate::handlers::presets::CreatePresetRequest,
            crate::handlers::presets::UpdatePresetRequest,
            crate::handlers::presets::PresetResponse,
            crate::handlers::presets::PresetEnvelope,
            crate::handlers::presets::PresetListResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Access token obtained from /api/auth/login.\n\
                            Include in requests as: `Authorization: Bearer <token>`",
                        ))
                        .build(),
                ),
            );
        }

        openapi.security = Some(vec![]);
    }
}

pub fn swagger_router() -> Router {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}
