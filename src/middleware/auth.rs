//! Authentication middleware.
//!
//! Validates the bearer access token, confirms the bound session has not
//! been revoked, and attaches the [`Subject`] to request extensions. Every
//! protected handler downstream reads the subject from extensions; there is
//! no other way to reach a repository method.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::auth::session::SessionStore;
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(
                    json!({"error": "Missing authorization header", "code": "MISSING_AUTH_HEADER"}),
                ),
            )
                .into_response()
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid authorization header format", "code": "INVALID_AUTH_FORMAT"})),
        )
            .into_response()
    })?;

    let claims = state.jwt_config.verify_access_token(token).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid or expired token", "code": "INVALID_TOKEN"})),
        )
            .into_response()
    })?;

    let subject = claims.subject().ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid token claims", "code": "INVALID_TOKEN"})),
        )
            .into_response()
    })?;

    // The session store is authoritative: revocation (logout, rotation
    // replay) invalidates outstanding access tokens immediately.
    let session_active = {
        let mut conn = state.db_pool.get().map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Database connection error", "code": "DB_CONNECTION_ERROR"})),
            )
                .into_response()
        })?;

        SessionStore::is_active(&mut conn, subject.session_id).map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Session lookup failed", "code": "SESSION_LOOKUP_ERROR"})),
            )
                .into_response()
        })?
    };

    if !session_active {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Session has been revoked", "code": "SESSION_REVOKED"})),
        )
            .into_response());
    }

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(subject);
    Ok(next.run(req).await)
}
