use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::workspaces)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub plan: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workspaces)]
pub struct NewWorkspace {
    pub id: Uuid,
    pub name: String,
    pub plan: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub workspace_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::sessions)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub refresh_token_hash: String,
    pub parent_session_id: Option<Uuid>,
    pub root_session_id: Uuid,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub refresh_token_hash: String,
    pub parent_session_id: Option<Uuid>,
    pub root_session_id: Uuid,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::documents)]
pub struct Document {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub content_type: String,
    #[serde(skip_serializing)]
    pub blob_ref: String,
    pub content_hash: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub content_type: String,
    pub blob_ref: String,
    pub content_hash: String,
    pub status: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::transformations)]
pub struct Transformation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub status: String,
    pub result: Option<String>,
    pub error_reason: Option<String>,
    pub provider_used: Option<String>,
    pub tokens_used: Option<i64>,
    pub attempts: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::transformations)]
pub struct NewTransformation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub status: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::transformation_presets)]
pub struct TransformationPreset {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub is_shared: bool,
    pub usage_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::transformation_presets)]
pub struct NewTransformationPreset {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub is_shared: bool,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::queued_tasks)]
pub struct QueuedTask {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub attempts: i32,
    pub not_before: NaiveDateTime,
    pub claim_owner: Option<String>,
    pub claim_expires_at: Option<NaiveDateTime>,
    pub cancel_requested: bool,
    pub payload: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::queued_tasks)]
pub struct NewQueuedTask {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub not_before: NaiveDateTime,
    pub payload: serde_json::Value,
}
