//! Transformation handlers: request-side job orchestration.
//!
//! Create validates the kind and parameters, resolves the preset, persists
//! the pending job and its queue row atomically, then publishes
//! `transformation.started` and wakes the worker pool. Status transitions
//! after that point belong to the executor holding the claim.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use diesel::connection::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Subject,
    error::{ApiError, ApiResult},
    events::{workspace_topic, EventKind},
    models::{NewTransformation, Transformation},
    pagination::PaginationParams,
    queue::{CancelOutcome, TaskPayload, TaskQueue},
    repo::{scoped_conn, DocumentRepo, PresetRepo, TransformationRepo},
    transform::{self, TransformationKind, TransformationStatus},
    AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTransformationRequest {
    pub document_id: Option<Uuid>,
    #[schema(example = "summary")]
    pub kind: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub preset_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransformationResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    #[schema(example = "summary")]
    pub kind: String,
    pub parameters: serde_json::Value,
    #[schema(example = "pending")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<i64>,
    pub attempts: i32,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl From<Transformation> for TransformationResponse {
    fn from(t: Transformation) -> Self {
        Self {
            id: t.id,
            workspace_id: t.workspace_id,
            user_id: t.user_id,
            document_id: t.document_id,
            kind: t.kind,
            parameters: t.parameters,
            status: t.status,
            result: t.result,
            error_reason: t.error_reason,
            provider_used: t.provider_used,
            tokens_used: t.tokens_used,
            attempts: t.attempts,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransformationEnvelope {
    pub transformation: TransformationResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransformationListResponse {
    pub transformations: Vec<TransformationResponse>,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransformationStatusResponse {
    pub id: Uuid,
    #[schema(example = "running")]
    pub status: String,
    pub attempts: i32,
}

#[utoipa::path(
    post,
    path = "/api/transformations",
    tag = "Transformations",
    request_body = CreateTransformationRequest,
    responses(
        (status = 201, description = "Transformation queued", body = TransformationEnvelope),
        (status = 400, description = "Invalid kind or parameters", body = ApiError),
        (status = 404, description = "Document or preset not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_transformation(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(payload): Json<CreateTransformationRequest>,
) -> ApiResult<(StatusCode, Json<TransformationEnvelope>)> {
    let kind = TransformationKind::parse(&payload.kind).ok_or_else(|| {
        ApiError::bad_request(
            format!("Unknown transformation kind '{}'", payload.kind),
            "UNKNOWN_KIND",
        )
    })?;

    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    if let Some(document_id) = payload.document_id {
        DocumentRepo::get(&mut conn, &subject, document_id)
            .map_err(|e| {
                error!(error = %e, "Failed to load document");
                ApiError::db_error()
            })?
            .ok_or_else(|| ApiError::entity_not_found("Document"))?;
    }

    // Preset parameters merge under the request overrides; overrides win.
    let request_parameters = if payload.parameters.is_null() {
        json!({})
    } else {
        payload.parameters
    };

    let effective_parameters = match payload.preset_id {
        Some(preset_id) => {
            let preset = PresetRepo::get_accessible(&mut conn, &subject, preset_id)
                .map_err(|e| {
                    error!(error = %e, "Failed to load preset");
                    ApiError::db_error()
                })?
                .ok_or_else(|| ApiError::entity_not_found("Preset"))?;

            if preset.kind != kind.as_str() {
                return Err(ApiError::bad_request(
                    format!(
                        "Preset is for kind '{}', request is for '{}'",
                        preset.kind, kind
                    ),
                    "PRESET_KIND_MISMATCH",
                ));
            }

            transform::merge_parameters(&preset.parameters, &request_parameters)
        }
        None => request_parameters,
    };

    transform::validate_parameters(kind, &effective_parameters)
        .map_err(|reason| ApiError::bad_request(reason, "INVALID_PARAMETERS"))?;

    let new_transformation = NewTransformation {
        id: Uuid::new_v4(),
        workspace_id: subject.workspace_id,
        user_id: subject.user_id,
        document_id: payload.document_id,
        kind: kind.as_str().to_string(),
        parameters: effective_parameters.clone(),
        status: TransformationStatus::Pending.as_str().to_string(),
    };

    // Job row, queue row, and preset usage commit together; the started
    // event goes out only after the write is durable.
    let transformation = conn
        .transaction::<Transformation, diesel::result::Error, _>(|conn| {
            let transformation = TransformationRepo::create(conn, &new_transformation)?;

            let task_payload = TaskPayload {
                transformation_id: transformation.id,
                workspace_id: transformation.workspace_id,
                user_id: transformation.user_id,
                kind: transformation.kind.clone(),
                parameters: transformation.parameters.clone(),
                document_id: transformation.document_id,
            };

            TaskQueue::enqueue(
                conn,
                transformation.id,
                transformation.workspace_id,
                &task_payload,
            )
            .map_err(|_| diesel::result::Error::RollbackTransaction)?;

            if let Some(preset_id) = payload.preset_id {
                PresetRepo::increment_usage(conn, &subject, preset_id)?;
            }

            Ok(transformation)
        })
        .map_err(|e| {
            error!(error = %e, "Failed to persist transformation");
            ApiError::db_error()
        })?;

    state
        .bus
        .publish(
            workspace_topic(subject.workspace_id),
            EventKind::TransformationStarted,
            json!({
                "id": transformation.id,
                "kind": transformation.kind,
                "workspace_id": transformation.workspace_id,
            }),
        )
        .await;

    state.queue_signal.wake();

    info!(
        transformation_id = %transformation.id,
        kind = %transformation.kind,
        workspace_id = %subject.workspace_id,
        "Transformation queued"
    );

    Ok((
        StatusCode::CREATED,
        Json(TransformationEnvelope {
            transformation: transformation.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/transformations",
    tag = "Transformations",
    params(PaginationParams),
    responses(
        (status = 200, description = "Workspace transformations", body = TransformationListResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_transformations(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<TransformationListResponse>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let (transformations, count) = TransformationRepo::list(&mut conn, &subject, &pagination)
        .map_err(|e| {
            error!(error = %e, "Failed to list transformations");
            ApiError::db_error()
        })?;

    Ok(Json(TransformationListResponse {
        transformations: transformations.into_iter().map(Into::into).collect(),
        count,
    }))
}

#[utoipa::path(
    get,
    path = "/api/transformations/{id}",
    tag = "Transformations",
    params(("id" = Uuid, Path, description = "Transformation id")),
    responses(
        (status = 200, description = "Transformation", body = TransformationEnvelope),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_transformation(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransformationEnvelope>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let transformation = TransformationRepo::get(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load transformation");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Transformation"))?;

    Ok(Json(TransformationEnvelope {
        transformation: transformation.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/transformations/{id}/status",
    tag = "Transformations",
    params(("id" = Uuid, Path, description = "Transformation id")),
    responses(
        (status = 200, description = "Status snapshot", body = TransformationStatusResponse),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn transformation_status(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransformationStatusResponse>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let transformation = TransformationRepo::get(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load transformation");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Transformation"))?;

    Ok(Json(TransformationStatusResponse {
        id: transformation.id,
        status: transformation.status,
        attempts: transformation.attempts,
    }))
}

#[utoipa::path(
    post,
    path = "/api/transformations/{id}/cancel",
    tag = "Transformations",
    params(("id" = Uuid, Path, description = "Transformation id")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_transformation(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let transformation = TransformationRepo::get(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load transformation");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Transformation"))?;

    if TransformationStatus::parse(&transformation.status)
        .map(|s| s.is_terminal())
        .unwrap_or(false)
    {
        // Already settled; nothing to cancel.
        return Ok(StatusCode::ACCEPTED);
    }

    let outcome = TaskQueue::cancel(&mut conn, id).map_err(|e| {
        error!(error = %e, "Failed to cancel queued task");
        ApiError::db_error()
    })?;

    match outcome {
        CancelOutcome::Flagged => {
            // The claim holder observes the flag between provider attempts
            // and writes the terminal state itself.
            info!(transformation_id = %id, "Cancellation flagged for claim holder");
        }
        CancelOutcome::Removed | CancelOutcome::NotFound => {
            let wrote = TransformationRepo::cancel(&mut conn, &subject, id).map_err(|e| {
                error!(error = %e, "Failed to mark transformation cancelled");
                ApiError::db_error()
            })?;

            if wrote {
                state
                    .bus
                    .publish(
                        workspace_topic(subject.workspace_id),
                        EventKind::TransformationFailed,
                        json!({
                            "id": id,
                            "workspace_id": subject.workspace_id,
                            "reason": transform::REASON_CANCELLED,
                        }),
                    )
                    .await;
                info!(transformation_id = %id, "Transformation cancelled");
            } else {
                warn!(transformation_id = %id, "Cancel raced a terminal transition");
            }
        }
    }

    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}/transformations",
    tag = "Transformations",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Transformations referencing the document", body = TransformationListResponse),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_document_transformations(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransformationListResponse>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    DocumentRepo::get(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load document");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Document"))?;

    let transformations =
        TransformationRepo::list_by_document(&mut conn, &subject, id).map_err(|e| {
            error!(error = %e, "Failed to list document transformations");
            ApiError::db_error()
        })?;

    let count = transformations.len() as i64;
    Ok(Json(TransformationListResponse {
        transformations: transformations.into_iter().map(Into::into).collect(),
        count,
    }))
}
