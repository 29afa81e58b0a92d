//! Durable task queue backed by the database.
//!
//! Delivery is at-least-once: claims are leases, expired leases make a task
//! eligible again, and the executor absorbs re-delivery of terminal jobs.
//! Claim selection uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! contend on the same row.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::{NewQueuedTask, QueuedTask};
use crate::schema::queued_tasks;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("claim is no longer held by this worker")]
    ClaimLost,
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Serialized job input carried on the queue row. The task id doubles as the
/// transformation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub transformation_id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub document_id: Option<Uuid>,
}

/// Outcome of a cancellation request against the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was unclaimed and has been removed from the queue.
    Removed,
    /// A worker holds the claim; the cooperative cancel flag is set and the
    /// executor will observe it between provider attempts.
    Flagged,
    NotFound,
}

/// In-process wake signal posted on enqueue so idle workers pick new work up
/// without waiting out the poll interval.
#[derive(Clone, Default)]
pub struct QueueSignal(Arc<Notify>);

impl QueueSignal {
    pub fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    pub fn wake(&self) {
        self.0.notify_waiters();
    }

    pub async fn wait(&self) {
        self.0.notified().await;
    }
}

pub struct TaskQueue;

impl TaskQueue {
    pub fn enqueue(
        conn: &mut PgConnection,
        transformation_id: Uuid,
        workspace_id: Uuid,
        payload: &TaskPayload,
    ) -> QueueResult<QueuedTask> {
        let new_task = NewQueuedTask {
            id: transformation_id,
            workspace_id,
            not_before: Utc::now().naive_utc(),
            payload: serde_json::to_value(payload).unwrap_or_default(),
        };

        let task = diesel::insert_into(queued_tasks::table)
            .values(&new_task)
            .returning(QueuedTask::as_returning())
            .get_result(conn)?;

        Ok(task)
    }

    /// Claims the next eligible task for `worker_id` with a bounded lease.
    /// Eligible rows are unclaimed or hold an expired lease, ordered by
    /// `not_before` then id. Increments the attempt counter.
    pub fn claim(
        conn: &mut PgConnection,
        worker_id: &str,
        lease_seconds: i64,
    ) -> QueueResult<Option<QueuedTask>> {
        let now = Utc::now().naive_utc();

        conn.transaction(|conn| {
            let task_opt = queued_tasks::table
                .filter(queued_tasks::not_before.le(now))
                .filter(
                    queued_tasks::claim_owner
                        .is_null()
                        .or(queued_tasks::claim_expires_at.lt(now)),
                )
                .order((queued_tasks::not_before.asc(), queued_tasks::id.asc()))
                .for_update()
                .skip_locked()
                .first::<QueuedTask>(conn)
                .optional()?;

            if let Some(task) = task_opt {
                let lease_expiry = now + ChronoDuration::seconds(lease_seconds);

                diesel::update(queued_tasks::table.find(task.id))
                    .set((
                        queued_tasks::claim_owner.eq(worker_id),
                        queued_tasks::claim_expires_at.eq(lease_expiry),
                        queued_tasks::attempts.eq(task.attempts + 1),
                    ))
                    .execute(conn)?;

                let refreshed = queued_tasks::table.find(task.id).first(conn)?;
                Ok::<Option<QueuedTask>, diesel::result::Error>(Some(refreshed))
            } else {
                Ok::<Option<QueuedTask>, diesel::result::Error>(None)
            }
        })
        .map_err(QueueError::from)
    }

    /// Removes a finished task. Fails with `ClaimLost` when another worker
    /// has since reclaimed the row (lease expiry).
    pub fn ack(conn: &mut PgConnection, task_id: Uuid, worker_id: &str) -> QueueResult<()> {
        let deleted = diesel::delete(
            queued_tasks::table
                .filter(queued_tasks::id.eq(task_id))
                .filter(queued_tasks::claim_owner.eq(worker_id)),
        )
        .execute(conn)?;

        if deleted == 0 {
            return Err(QueueError::ClaimLost);
        }
        Ok(())
    }

    /// Releases the claim and pushes `not_before` out by
    /// `base * 2^min(attempts, cap)` for the next delivery.
    pub fn nack(
        conn: &mut PgConnection,
        task: &QueuedTask,
        worker_id: &str,
        backoff_base_ms: u64,
        backoff_exponent_cap: u32,
    ) -> QueueResult<()> {
        let exponent = (task.attempts.max(0) as u32).min(backoff_exponent_cap);
        let delay_ms = backoff_base_ms.saturating_mul(1u64 << exponent);
        let next_run = Utc::now().naive_utc() + ChronoDuration::milliseconds(delay_ms as i64);

        let updated = diesel::update(
            queued_tasks::table
                .filter(queued_tasks::id.eq(task.id))
                .filter(queued_tasks::claim_owner.eq(worker_id)),
        )
        .set((
            queued_tasks::not_before.eq(next_run),
            queued_tasks::claim_owner.eq::<Option<String>>(None),
            queued_tasks::claim_expires_at.eq::<Option<chrono::NaiveDateTime>>(None),
        ))
        .execute(conn)?;

        if updated == 0 {
            return Err(QueueError::ClaimLost);
        }
        Ok(())
    }

    /// Cancels a queued task: removes it outright when unclaimed, otherwise
    /// flags it for cooperative cancellation.
    pub fn cancel(conn: &mut PgConnection, task_id: Uuid) -> QueueResult<CancelOutcome> {
        let now = Utc::now().naive_utc();

        conn.transaction(|conn| -> Result<CancelOutcome, diesel::result::Error> {
            let task_opt = queued_tasks::table
                .find(task_id)
                .for_update()
                .first::<QueuedTask>(conn)
                .optional()?;

            let Some(task) = task_opt else {
                return Ok(CancelOutcome::NotFound);
            };

            let claimed = matches!(task.claim_expires_at, Some(expiry) if expiry > now)
                && task.claim_owner.is_some();

            if claimed {
                diesel::update(queued_tasks::table.find(task_id))
                    .set(queued_tasks::cancel_requested.eq(true))
                    .execute(conn)?;
                Ok(CancelOutcome::Flagged)
            } else {
                diesel::delete(queued_tasks::table.find(task_id)).execute(conn)?;
                Ok(CancelOutcome::Removed)
            }
        })
        .map_err(QueueError::from)
    }

    /// Polled by the executor between provider attempts.
    pub fn is_cancel_requested(conn: &mut PgConnection, task_id: Uuid) -> QueueResult<bool> {
        let flagged: Option<bool> = queued_tasks::table
            .find(task_id)
            .select(queued_tasks::cancel_requested)
            .first(conn)
            .optional()?;

        Ok(flagged.unwrap_or(false))
    }
}

pub fn compute_backoff_ms(attempts: i32, base_ms: u64, exponent_cap: u32) -> u64 {
    let exponent = (attempts.max(0) as u32).min(exponent_cap);
    base_ms.saturating_mul(1u64 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_doubles_until_cap() {
        assert_eq!(compute_backoff_ms(0, 100, 6), 100);
        assert_eq!(compute_backoff_ms(1, 100, 6), 200);
        assert_eq!(compute_backoff_ms(3, 100, 6), 800);
        // Capped exponent
        assert_eq!(compute_backoff_ms(10, 100, 6), 6400);
        assert_eq!(compute_backoff_ms(100, 100, 6), 6400);
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let delay = compute_backoff_ms(i32::MAX, u64::MAX / 2, 63);
        assert_eq!(delay, u64::MAX);
    }

    #[test]
    fn test_task_payload_round_trips() {
        let payload = TaskPayload {
            transformation_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: "summary".to_string(),
            parameters: json!({"length": 200}),
            document_id: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        let decoded: TaskPayload = serde_json::from_value(value).unwrap();

        assert_eq!(decoded.transformation_id, payload.transformation_id);
        assert_eq!(decoded.kind, payload.kind);
        assert_eq!(decoded.parameters, payload.parameters);
    }
}
