//! Document handlers: multipart upload, listing, retrieval, soft delete.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Subject,
    blobstore::blob_key,
    error::{ApiError, ApiResult},
    models::{Document, NewDocument},
    pagination::PaginationParams,
    repo::{scoped_conn, DocumentRepo},
    transform::DocumentStatus,
    AppState,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub content_type: String,
    pub content_hash: String,
    #[schema(example = "ready")]
    pub status: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            workspace_id: doc.workspace_id,
            user_id: doc.user_id,
            title: doc.title,
            original_filename: doc.original_filename,
            content_type: doc.content_type,
            content_hash: doc.content_hash,
            status: doc.status,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentEnvelope {
    pub document: DocumentResponse,
}

#[utoipa::path(
    post,
    path = "/api/documents/upload",
    tag = "Documents",
    responses(
        (status = 201, description = "Document stored", body = DocumentEnvelope),
        (status = 400, description = "Invalid upload", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<DocumentEnvelope>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename = String::new();
    let mut content_type = "application/octet-stream".to_string();
    let mut title: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Invalid multipart upload");
        ApiError::bad_request("Invalid multipart data", "INVALID_MULTIPART")
    })? {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                let bytes = field.bytes().await.map_err(|e| {
                    warn!(error = %e, "Failed reading upload body");
                    ApiError::bad_request("Failed to read file", "UPLOAD_READ_ERROR")
                })?;
                file_bytes = Some(bytes.to_vec());
            }
            "title" => {
                title = field.text().await.ok().filter(|t| !t.trim().is_empty());
            }
            "description" => {
                // Accepted for interface compatibility; not stored.
                let _ = field.text().await;
            }
            _ => {}
        }
    }

    let bytes = file_bytes
        .ok_or_else(|| ApiError::bad_request("Missing 'file' field", "MISSING_FILE"))?;

    if bytes.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty", "EMPTY_FILE"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::bad_request(
            "Uploaded file exceeds the size limit",
            "FILE_TOO_LARGE",
        ));
    }

    let content_hash = hex::encode(Sha256::digest(&bytes));
    let blob_ref = blob_key(subject.workspace_id, &content_hash);

    state
        .blob_store
        .put(&blob_ref, bytes, Some(content_type.clone()))
        .await
        .map_err(|e| {
            error!(error = %e, "Blob store write failed");
            ApiError::internal("Failed to store document", "BLOB_STORE_ERROR")
        })?;

    let status = if state.extractor.supports(&content_type) {
        DocumentStatus::Ready
    } else {
        // Stored but not transformable until a richer extractor handles it.
        DocumentStatus::Pending
    };

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        workspace_id: subject.workspace_id,
        user_id: subject.user_id,
        title: title.unwrap_or_else(|| filename.clone()),
        original_filename: filename,
        content_type,
        blob_ref,
        content_hash,
        status: status.as_str().to_string(),
    };

    let mut conn = scoped_conn(&state.db_pool, &subject)?;
    let document = DocumentRepo::create(&mut conn, &new_document).map_err(|e| {
        error!(error = %e, "Failed to persist document");
        ApiError::db_error()
    })?;

    info!(
        document_id = %document.id,
        workspace_id = %subject.workspace_id,
        status = %document.status,
        "Document uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(DocumentEnvelope {
            document: document.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/documents",
    tag = "Documents",
    params(PaginationParams),
    responses(
        (status = 200, description = "Workspace documents", body = DocumentListResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<DocumentListResponse>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let (documents, count) =
        DocumentRepo::list(&mut conn, &subject, &pagination).map_err(|e| {
            error!(error = %e, "Failed to list documents");
            ApiError::db_error()
        })?;

    Ok(Json(DocumentListResponse {
        documents: documents.into_iter().map(Into::into).collect(),
        count,
    }))
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document", body = DocumentEnvelope),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_document(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentEnvelope>> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let document = DocumentRepo::get(&mut conn, &subject, id)
        .map_err(|e| {
            error!(error = %e, "Failed to load document");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Document"))?;

    Ok(Json(DocumentEnvelope {
        document: document.into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/documents/{id}",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = scoped_conn(&state.db_pool, &subject)?;

    let deleted = DocumentRepo::soft_delete(&mut conn, &subject, id).map_err(|e| {
        error!(error = %e, "Failed to delete document");
        ApiError::db_error()
    })?;

    if !deleted {
        return Err(ApiError::entity_not_found("Document"));
    }

    info!(document_id = %id, workspace_id = %subject.workspace_id, "Document deleted");
    Ok(StatusCode::NO_CONTENT)
}
