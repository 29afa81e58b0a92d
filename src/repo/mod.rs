//! Workspace-scoped persistence.
//!
//! Repository modules are the only code that touches entity tables. Every
//! request-path method takes a [`Subject`](crate::auth::Subject) and includes
//! `workspace_id = subject.workspace_id` in its filter; a row that exists but
//! belongs to another workspace is indistinguishable from a missing row.
//! Methods that run without a subject (executor and maintenance paths) are
//! named with an `unscoped_` prefix and are not reachable from handlers.

pub mod documents;
pub mod presets;
pub mod transformations;
pub mod users;

use axum::{http::StatusCode, Json};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use tracing::error;
use uuid::Uuid;

use crate::auth::Subject;
use crate::error::{get_db_conn, ApiError};

pub use documents::DocumentRepo;
pub use presets::PresetRepo;
pub use transformations::TransformationRepo;
pub use users::UserRepo;

pub type PooledPgConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Checks out a connection with the subject's workspace applied as the
/// connection-level tenancy variable. Protected handlers go through this
/// instead of a bare pool checkout.
pub fn scoped_conn(
    pool: &crate::DbPool,
    subject: &Subject,
) -> Result<PooledPgConnection, (StatusCode, Json<ApiError>)> {
    let mut conn = get_db_conn(pool)?;
    set_workspace_context(&mut conn, subject.workspace_id).map_err(|e| {
        error!(error = %e, "Failed to set workspace context");
        ApiError::db_error()
    })?;
    Ok(conn)
}

/// Sets the tenancy variable for the current connection so database-side
/// row-level policies enforce scoping even if an application filter were
/// ever omitted. The explicit filters above remain the primary, tested
/// layer; neither alone is treated as sufficient.
pub fn set_workspace_context(
    conn: &mut PgConnection,
    workspace_id: Uuid,
) -> Result<(), diesel::result::Error> {
    diesel::sql_query("SELECT set_config('app.workspace_id', $1, false)")
        .bind::<diesel::sql_types::Text, _>(workspace_id.to_string())
        .execute(conn)?;
    Ok(())
}
