//! Transformation preset handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Subject,
    error::{ApiError, ApiResult},
    models::{NewTransformationPreset, TransformationPreset},
    repo::{scoped_conn, PresetRepo},
    transform::{self, TransformationKind},
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePresetRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be 1-120 characters"))]
    #[schema(example = "Weekly digest")]
    pub name: String,
    pub description: Option<String>,
    #[schema(example = "newsletter")]
    pub kind: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub is_shared: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePresetRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be 1-120 characters"))]
    pub name: Option<String>,
    /// `null` clears the description; omitting the field leaves it unchanged.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub parameters: Option<serde_json::Value>,
    pub is_shared: Option<bool>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresetResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub is_shared: bool,
    pub usage_count: i64,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl From<TransformationPreset> for PresetResponse {
    fn from(p: TransformationPreset) -> Self {
        Self {
            id: p.id,
            workspace_id: p.workspace_id,
            user_id: p.user_id,
            name: p.name,
            description: p.description,
            kind: p.kind,
            parameters: p.parameters,
            is_shared: p.is_shared,
            usage_count: p.usage_count,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresetEnvelope {
    pub preset: PresetResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresetListResponse {
    pub presets: Vec<PresetResponse>,
    pub count: i64,
}

#[utoipa::path(
    post,
    path = "/api/transformation-presets",
    tag = "Presets",
    request_body = CreatePresetRequest,
    responses(
        (status = 201, description = "Preset created", body = PresetEnvelope),
        (status = 400, description = "Invalid preset", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_preset(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(payload): Json<CreatePresetRequest>,
) -> ApiResult<(StatusCode, Json<PresetEnvelope>)> {
    if let Err(e) = payload.validate() {
        return Err(ApiError::bad_request(
            format!("Validation error: {}", e),
            "VALIDATION_ERROR",
        ));
    }

    let kind = TransformationKind::parse(&payload.kind).ok_or_else(|| {
        ApiError::bad_request(
            format!("Unknown transformation kind '{}'", payload.kind),
            "UNKNOWN_KIND",
        )
    })?;

    transform::validate_parameters(kind, &payload.parameters)
        .map_err(|reason| ApiError::bad_request(reason, "INVALID_PARAMETERS"))?;

    let new_preset = NewTransformationPreset {
        workspace_id: subject.workspace_id,
        user_id: subject.user_id,
        name: payload.name,
        description: payload.description,
        kind: kind.as_str().to_string(),
        parameters: payload.parameters,
        is_shared: payload.is_shared,
    };

    let mut conn = scoped_conn(&state.db_pool, &subject)?;
    let preset = PresetRepo::create(&mut conn, &new_preset).map_err(|e| {
        error!(error = %e, "Failed to create preset");
        ApiError::db_error()
    })?;

    info!(preset_id = %preset.id, workspace_id = %subject.workspace_id, "Preset created");

    Ok((
        StatusCode::CREATED,
        Json(PresetEnvelope {
            preset: preset.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/transformation-presets",
    tag = "Presets",
    responses(
        (status = 200, description = "Accessible presets", body = PresetListResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_presets(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
) -> ApiResult<Json<PresetListResponse>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let presets = PresetRepo::list_accessible(&mut conn, &subject).map_err(|e| {
        error!(error = %e, "Failed to list presets");
        ApiError::db_error()
    })?;

    let count = presets.len() as i64;
    Ok(Json(PresetListResponse {
        presets: presets.into_iter().map(Into::into).collect(),
        count,
    }))
}

#[utoipa::path(
    patch,
    path = "/api/transformation-presets/{id}",
    tag = "Presets",
    params(("id" = Uuid, Path, description = "Preset id")),
    request_body = UpdatePresetRequest,
    responses(
        (status = 200, description = "Preset updated", body = PresetEnvelope),
        (status = 403, description = "Not the owner", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_preset(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePresetRequest>,
) -> ApiResult<Json<PresetEnvelope>> {
    if let Err(e) = payload.validate() {
        return Err(ApiError::bad_request(
            format!("Validation error: {}", e),
            "VALIDATION_ERROR",
        ));
    }

    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    // Distinguish "can see it but doesn't own it" (403) from "cannot see it
    // at all" (404); private presets of other users read as absent.
    let visible = PresetRepo::get_accessible(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load preset");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Preset"))?;

    if visible.user_id != subject.user_id {
        return Err(ApiError::forbidden(
            "Only the owner may modify a preset",
            "NOT_PRESET_OWNER",
        ));
    }

    if let Some(parameters) = &payload.parameters {
        let kind = TransformationKind::parse(&visible.kind).ok_or_else(|| {
            ApiError::internal("Stored preset has an unknown kind", "PRESET_KIND_CORRUPT")
        })?;
        transform::validate_parameters(kind, parameters)
            .map_err(|reason| ApiError::bad_request(reason, "INVALID_PARAMETERS"))?;
    }

    let updated = PresetRepo::update_owned(
        &mut conn,
        &subject,
        id,
        payload.name.as_deref(),
        payload.description.as_ref().map(|d| d.as_deref()),
        payload.parameters.as_ref(),
        payload.is_shared,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to update preset");
        ApiError::db_error()
    })?
    .ok_or_else(|| ApiError::entity_not_found("Preset"))?;

    info!(preset_id = %id, "Preset updated");

    Ok(Json(PresetEnvelope {
        preset: updated.into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/transformation-presets/{id}",
    tag = "Presets",
    params(("id" = Uuid, Path, description = "Preset id")),
    responses(
        (status = 204, description = "Preset deleted"),
        (status = 403, description = "Not the owner", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_preset(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let visible = PresetRepo::get_accessible(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load preset");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Preset"))?;

    if visible.user_id != subject.user_id {
        return Err(ApiError::forbidden(
            "Only the owner may delete a preset",
            "NOT_PRESET_OWNER",
        ));
    }

    let deleted = PresetRepo::delete_owned(&mut conn, &subject, id).map_err(|e| {
        error!(error = %e, "Failed to delete preset");
        ApiError::db_error()
    })?;

    if !deleted {
        return Err(ApiError::entity_not_found("Preset"));
    }

    info!(preset_id = %id, "Preset deleted");
    Ok(StatusCode::NO_CONTENT)
}
