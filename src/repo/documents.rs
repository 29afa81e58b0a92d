//! Document metadata persistence.

use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::Subject;
use crate::models::{Document, NewDocument};
use crate::pagination::PaginationParams;
use crate::schema::documents;

pub struct DocumentRepo;

impl DocumentRepo {
    pub fn create(
        conn: &mut PgConnection,
        document: &NewDocument,
    ) -> Result<Document, diesel::result::Error> {
        diesel::insert_into(documents::table)
            .values(document)
            .returning(Document::as_returning())
            .get_result(conn)
    }

    pub fn get(
        conn: &mut PgConnection,
        subject: &Subject,
        document_id: Uuid,
    ) -> Result<Option<Document>, diesel::result::Error> {
        documents::table
            .filter(documents::id.eq(document_id))
            .filter(documents::workspace_id.eq(subject.workspace_id))
            .filter(documents::deleted_at.is_null())
            .select(Document::as_select())
            .first(conn)
            .optional()
    }

    pub fn list(
        conn: &mut PgConnection,
        subject: &Subject,
        pagination: &PaginationParams,
    ) -> Result<(Vec<Document>, i64), diesel::result::Error> {
        let scoped = documents::table
            .filter(documents::workspace_id.eq(subject.workspace_id))
            .filter(documents::deleted_at.is_null());

        let total: i64 = scoped.count().get_result(conn)?;

        let rows = scoped
            .order(documents::created_at.desc())
            .limit(pagination.limit())
            .offset(pagination.offset())
            .select(Document::as_select())
            .load(conn)?;

        Ok((rows, total))
    }

    /// Marks the document deleted; rows stay for administrative paths that
    /// explicitly opt into seeing them.
    pub fn soft_delete(
        conn: &mut PgConnection,
        subject: &Subject,
        document_id: Uuid,
    ) -> Result<bool, diesel::result::Error> {
        let updated = diesel::update(
            documents::table
                .filter(documents::id.eq(document_id))
                .filter(documents::workspace_id.eq(subject.workspace_id))
                .filter(documents::deleted_at.is_null()),
        )
        .set((
            documents::deleted_at.eq(diesel::dsl::now),
            documents::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        Ok(updated > 0)
    }

    /// Executor path: loads a document for a claimed task. Scoped by the
    /// workspace recorded on the task, not a request subject.
    pub fn unscoped_get_for_worker(
        conn: &mut PgConnection,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>, diesel::result::Error> {
        documents::table
            .filter(documents::id.eq(document_id))
            .filter(documents::workspace_id.eq(workspace_id))
            .filter(documents::deleted_at.is_null())
            .select(Document::as_select())
            .first(conn)
            .optional()
    }
}
