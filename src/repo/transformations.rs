//! Transformation job persistence and guarded status transitions.
//!
//! Status writes are guarded row-level updates: a transition only applies
//! when the row is still in an allowed source state, so transitions stay
//! monotonic toward a terminal state no matter how many times a task is
//! delivered.

use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::Subject;
use crate::models::{NewTransformation, Transformation};
use crate::pagination::PaginationParams;
use crate::schema::transformations;
use crate::transform::TransformationStatus;

pub struct TransformationRepo;

impl TransformationRepo {
    pub fn create(
        conn: &mut PgConnection,
        transformation: &NewTransformation,
    ) -> Result<Transformation, diesel::result::Error> {
        diesel::insert_into(transformations::table)
            .values(transformation)
            .returning(Transformation::as_returning())
            .get_result(conn)
    }

    pub fn get(
        conn: &mut PgConnection,
        subject: &Subject,
        transformation_id: Uuid,
    ) -> Result<Option<Transformation>, diesel::result::Error> {
        transformations::table
            .filter(transformations::id.eq(transformation_id))
            .filter(transformations::workspace_id.eq(subject.workspace_id))
            .select(Transformation::as_select())
            .first(conn)
            .optional()
    }

    pub fn list(
        conn: &mut PgConnection,
        subject: &Subject,
        pagination: &PaginationParams,
    ) -> Result<(Vec<Transformation>, i64), diesel::result::Error> {
        let scoped =
            transformations::table.filter(transformations::workspace_id.eq(subject.workspace_id));

        let total: i64 = scoped.count().get_result(conn)?;

        let rows = scoped
            .order(transformations::created_at.desc())
            .limit(pagination.limit())
            .offset(pagination.offset())
            .select(Transformation::as_select())
            .load(conn)?;

        Ok((rows, total))
    }

    pub fn list_by_document(
        conn: &mut PgConnection,
        subject: &Subject,
        document_id: Uuid,
    ) -> Result<Vec<Transformation>, diesel::result::Error> {
        transformations::table
            .filter(transformations::workspace_id.eq(subject.workspace_id))
            .filter(transformations::document_id.eq(document_id))
            .order(transformations::created_at.desc())
            .select(Transformation::as_select())
            .load(conn)
    }

    /// Requests cancellation from the request path. Only applies while the
    /// job is non-terminal; terminal rows are left untouched.
    pub fn cancel(
        conn: &mut PgConnection,
        subject: &Subject,
        transformation_id: Uuid,
    ) -> Result<bool, diesel::result::Error> {
        let updated = diesel::update(
            transformations::table
                .filter(transformations::id.eq(transformation_id))
                .filter(transformations::workspace_id.eq(subject.workspace_id))
                .filter(transformations::status.eq_any(vec![
                    TransformationStatus::Pending.as_str(),
                    TransformationStatus::Running.as_str(),
                ])),
        )
        .set((
            transformations::status.eq(TransformationStatus::Cancelled.as_str()),
            transformations::error_reason.eq(crate::transform::REASON_CANCELLED),
            transformations::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        Ok(updated > 0)
    }

    // Executor-side operations. The worker holds the task's claim; the
    // workspace comes from the claimed task row, never from a request.

    pub fn unscoped_load(
        conn: &mut PgConnection,
        transformation_id: Uuid,
    ) -> Result<Option<Transformation>, diesel::result::Error> {
        transformations::table
            .filter(transformations::id.eq(transformation_id))
            .select(Transformation::as_select())
            .first(conn)
            .optional()
    }

    /// `pending -> running`, also re-asserted on re-delivery of a job whose
    /// previous lease expired mid-run so the attempt counter stays current.
    /// Returns false when the row is already terminal.
    pub fn unscoped_mark_running(
        conn: &mut PgConnection,
        transformation_id: Uuid,
        attempts: i32,
    ) -> Result<bool, diesel::result::Error> {
        let updated = diesel::update(
            transformations::table
                .filter(transformations::id.eq(transformation_id))
                .filter(transformations::status.eq_any(vec![
                    TransformationStatus::Pending.as_str(),
                    TransformationStatus::Running.as_str(),
                ])),
        )
        .set((
            transformations::status.eq(TransformationStatus::Running.as_str()),
            transformations::attempts.eq(attempts),
            transformations::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        Ok(updated > 0)
    }

    /// `running -> completed`, recording result, provider, and token usage.
    pub fn unscoped_complete(
        conn: &mut PgConnection,
        transformation_id: Uuid,
        result: &str,
        provider: &str,
        tokens_used: Option<i64>,
    ) -> Result<bool, diesel::result::Error> {
        let updated = diesel::update(
            transformations::table
                .filter(transformations::id.eq(transformation_id))
                .filter(transformations::status.eq(TransformationStatus::Running.as_str())),
        )
        .set((
            transformations::status.eq(TransformationStatus::Completed.as_str()),
            transformations::result.eq(result),
            transformations::provider_used.eq(provider),
            transformations::tokens_used.eq(tokens_used),
            transformations::error_reason.eq::<Option<String>>(None),
            transformations::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        Ok(updated > 0)
    }

    /// `pending|running -> failed` with a client-safe reason.
    pub fn unscoped_fail(
        conn: &mut PgConnection,
        transformation_id: Uuid,
        reason: &str,
    ) -> Result<bool, diesel::result::Error> {
        let updated = diesel::update(
            transformations::table
                .filter(transformations::id.eq(transformation_id))
                .filter(transformations::status.eq_any(vec![
                    TransformationStatus::Pending.as_str(),
                    TransformationStatus::Running.as_str(),
                ])),
        )
        .set((
            transformations::status.eq(TransformationStatus::Failed.as_str()),
            transformations::error_reason.eq(reason),
            transformations::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        Ok(updated > 0)
    }

    /// `pending|running -> cancelled`, used when the executor observes the
    /// cooperative cancel flag mid-flight.
    pub fn unscoped_cancel(
        conn: &mut PgConnection,
        transformation_id: Uuid,
    ) -> Result<bool, diesel::result::Error> {
        let updated = diesel::update(
            transformations::table
                .filter(transformations::id.eq(transformation_id))
                .filter(transformations::status.eq_any(vec![
                    TransformationStatus::Pending.as_str(),
                    TransformationStatus::Running.as_str(),
                ])),
        )
        .set((
            transformations::status.eq(TransformationStatus::Cancelled.as_str()),
            transformations::error_reason.eq(crate::transform::REASON_CANCELLED),
            transformations::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)?;

        Ok(updated > 0)
    }
}
