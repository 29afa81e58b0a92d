//! Transformation executor: the worker pool that drains the task queue.
//!
//! Each worker claims a task under a lease, guards against re-delivery of
//! already-terminal jobs, walks the provider registry in order with the
//! cooperative cancel flag polled before every attempt, and writes exactly
//! one terminal transition before acking. Workers communicate with the
//! request path only through the queue and the event bus.

use std::sync::Arc;
use std::time::Duration;

use diesel::PgConnection;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::blobstore::BlobStore;
use crate::config::QueueConfig;
use crate::content::ContentExtractor;
use crate::events::{workspace_topic, EventBus, EventKind};
use crate::models::QueuedTask;
use crate::providers::{ProviderRegistry, ProviderRequest};
use crate::queue::{QueueSignal, TaskPayload, TaskQueue};
use crate::repo::{DocumentRepo, TransformationRepo};
use crate::transform::{
    prompt, TransformationKind, TransformationStatus, REASON_CANCELLED, REASON_INVALID_INPUT,
    REASON_PROVIDER_EXHAUSTED,
};
use crate::DbPool;

const RESULT_PREVIEW_CHARS: usize = 200;
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

pub struct ExecutorContext {
    pub db_pool: DbPool,
    pub registry: Arc<ProviderRegistry>,
    pub bus: EventBus,
    pub blob_store: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub queue_config: QueueConfig,
    pub signal: QueueSignal,
}

pub struct TransformationExecutor {
    ctx: Arc<ExecutorContext>,
}

enum AttemptOutcome {
    Completed,
    Cancelled,
    /// Every candidate provider refused or errored transiently.
    Exhausted,
    /// A provider rejected the input; retrying cannot help but the retry
    /// budget still bounds total attempts.
    Rejected,
}

impl TransformationExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Spawns the worker pool. The returned sender stops every worker on
    /// `send(true)`; the handles complete once in-flight tasks finish.
    pub fn spawn_pool(self) -> (watch::Sender<bool>, Vec<JoinHandle<()>>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.ctx.queue_config.worker_concurrency.max(1);

        let handles = (0..concurrency)
            .map(|i| {
                let ctx = self.ctx.clone();
                let shutdown_rx = shutdown_rx.clone();
                let worker_id = format!("{}-worker-{}", ctx.bus.instance_id(), i);
                tokio::spawn(async move {
                    Self::worker_loop(ctx, worker_id, shutdown_rx).await;
                })
            })
            .collect();

        info!(workers = concurrency, "Transformation executor started");
        (shutdown_tx, handles)
    }

    async fn worker_loop(
        ctx: Arc<ExecutorContext>,
        worker_id: String,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let poll_interval = Duration::from_millis(ctx.queue_config.poll_interval_ms);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let claimed = {
                let pool = ctx.db_pool.clone();
                let worker = worker_id.clone();
                let lease = ctx.queue_config.claim_lease_seconds;
                run_db(pool, move |conn| TaskQueue::claim(conn, &worker, lease)).await
            };

            match claimed {
                Ok(Some(task)) => {
                    if let Err(e) = Self::process_task(&ctx, &worker_id, task).await {
                        error!(error = %e, worker = %worker_id, "Task processing error");
                    }
                }
                Ok(None) => {
                    // Idle: wait for a wake signal, the poll interval, or shutdown.
                    tokio::select! {
                        _ = ctx.signal.wait() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, worker = %worker_id, "Claim failed; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!(worker = %worker_id, "Worker stopped");
    }

    #[instrument(skip(ctx, task), fields(task_id = %task.id, worker = %worker_id))]
    async fn process_task(
        ctx: &Arc<ExecutorContext>,
        worker_id: &str,
        task: QueuedTask,
    ) -> Result<(), anyhow::Error> {
        let payload: TaskPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                // Poison task: nothing downstream can use it.
                error!(error = %e, task_id = %task.id, "Undecodable task payload; dropping");
                Self::ack(ctx, task.id, worker_id).await;
                return Ok(());
            }
        };

        let transformation = {
            let pool = ctx.db_pool.clone();
            let id = payload.transformation_id;
            run_db(pool, move |conn| TransformationRepo::unscoped_load(conn, id)).await?
        };

        let Some(transformation) = transformation else {
            Self::ack(ctx, task.id, worker_id).await;
            return Ok(());
        };

        // Idempotency guard: a re-delivered terminal job is absorbed without
        // side effects.
        let status = TransformationStatus::parse(&transformation.status);
        if !matches!(
            status,
            Some(TransformationStatus::Pending) | Some(TransformationStatus::Running)
        ) {
            debug!(task_id = %task.id, status = %transformation.status, "Terminal job re-delivered; absorbing");
            Self::ack(ctx, task.id, worker_id).await;
            return Ok(());
        }

        let Some(kind) = TransformationKind::parse(&payload.kind) else {
            Self::finish_failed(ctx, &payload, task.id, worker_id, REASON_INVALID_INPUT).await;
            return Ok(());
        };

        if task.cancel_requested {
            Self::finish_cancelled(ctx, &payload, task.id, worker_id).await;
            return Ok(());
        }

        {
            let pool = ctx.db_pool.clone();
            let id = payload.transformation_id;
            let attempts = task.attempts;
            run_db(pool, move |conn| {
                TransformationRepo::unscoped_mark_running(conn, id, attempts)
            })
            .await?;
        }

        let document_content = match Self::load_document_content(ctx, &payload).await {
            Ok(content) => content,
            Err(reason) => {
                warn!(task_id = %task.id, reason = %reason, "Document content unavailable");
                Self::finish_failed(ctx, &payload, task.id, worker_id, REASON_INVALID_INPUT).await;
                return Ok(());
            }
        };

        let outcome =
            Self::run_providers(ctx, &payload, kind, document_content.as_deref(), task.id).await;

        match outcome {
            AttemptOutcome::Completed => {
                Self::ack(ctx, task.id, worker_id).await;
            }
            AttemptOutcome::Cancelled => {
                Self::finish_cancelled(ctx, &payload, task.id, worker_id).await;
            }
            AttemptOutcome::Exhausted | AttemptOutcome::Rejected => {
                if task.attempts < ctx.queue_config.max_attempts {
                    debug!(
                        task_id = %task.id,
                        attempts = task.attempts,
                        max_attempts = ctx.queue_config.max_attempts,
                        "No provider succeeded; scheduling retry"
                    );
                    let pool = ctx.db_pool.clone();
                    let worker = worker_id.to_string();
                    let base = ctx.queue_config.backoff_base_ms;
                    let cap = ctx.queue_config.backoff_exponent_cap;
                    let task_row = task.clone();
                    if let Err(e) = run_db(pool, move |conn| {
                        TaskQueue::nack(conn, &task_row, &worker, base, cap)
                    })
                    .await
                    {
                        warn!(error = %e, task_id = %task.id, "Nack failed");
                    }
                } else {
                    Self::finish_failed(ctx, &payload, task.id, worker_id, REASON_PROVIDER_EXHAUSTED)
                        .await;
                }
            }
        }

        Ok(())
    }

    /// Walks eligible providers in order. The cancel flag is polled before
    /// every attempt so cancellation takes effect between provider calls.
    async fn run_providers(
        ctx: &Arc<ExecutorContext>,
        payload: &TaskPayload,
        kind: TransformationKind,
        document_content: Option<&str>,
        task_id: Uuid,
    ) -> AttemptOutcome {
        let request = ProviderRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            prompt: prompt::build_prompt(kind, &payload.parameters, document_content),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        };

        let candidates = ctx.registry.candidates(kind);
        if candidates.is_empty() {
            return AttemptOutcome::Exhausted;
        }

        for idx in candidates {
            if Self::cancel_requested(ctx, task_id).await {
                return AttemptOutcome::Cancelled;
            }

            let provider_name = ctx.registry.provider_name(idx);

            ctx.bus
                .publish(
                    workspace_topic(payload.workspace_id),
                    EventKind::TransformationProgress,
                    json!({
                        "id": payload.transformation_id,
                        "workspace_id": payload.workspace_id,
                        "provider": provider_name,
                        "progress": 60,
                    }),
                )
                .await;

            match ctx.registry.invoke(idx, &request).await {
                Ok(reply) => {
                    // A cancel that landed while the provider was running
                    // wins over the completed result.
                    if Self::cancel_requested(ctx, task_id).await {
                        return AttemptOutcome::Cancelled;
                    }

                    let wrote = {
                        let pool = ctx.db_pool.clone();
                        let id = payload.transformation_id;
                        let content = reply.content.clone();
                        let provider = provider_name.to_string();
                        let tokens = Some(reply.tokens_total());
                        run_db(pool, move |conn| {
                            TransformationRepo::unscoped_complete(
                                conn, id, &content, &provider, tokens,
                            )
                        })
                        .await
                        .unwrap_or(false)
                    };

                    if !wrote {
                        // Lost the race to a concurrent cancel; the terminal
                        // state already written wins.
                        return AttemptOutcome::Cancelled;
                    }

                    ctx.bus
                        .publish(
                            workspace_topic(payload.workspace_id),
                            EventKind::TransformationCompleted,
                            json!({
                                "id": payload.transformation_id,
                                "workspace_id": payload.workspace_id,
                                "provider": provider_name,
                                "tokens_used": reply.tokens_total(),
                                "result_preview": preview(&reply.content),
                            }),
                        )
                        .await;

                    info!(
                        transformation_id = %payload.transformation_id,
                        provider = provider_name,
                        tokens = reply.tokens_total(),
                        "Transformation completed"
                    );
                    return AttemptOutcome::Completed;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        transformation_id = %payload.transformation_id,
                        provider = provider_name,
                        error = %e,
                        "Provider attempt failed; trying next"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        transformation_id = %payload.transformation_id,
                        provider = provider_name,
                        error = %e,
                        "Provider rejected request"
                    );
                    return AttemptOutcome::Rejected;
                }
            }
        }

        AttemptOutcome::Exhausted
    }

    async fn load_document_content(
        ctx: &Arc<ExecutorContext>,
        payload: &TaskPayload,
    ) -> Result<Option<String>, String> {
        let Some(document_id) = payload.document_id else {
            return Ok(None);
        };

        let document = {
            let pool = ctx.db_pool.clone();
            let workspace_id = payload.workspace_id;
            run_db(pool, move |conn| {
                DocumentRepo::unscoped_get_for_worker(conn, workspace_id, document_id)
            })
            .await
            .map_err(|e| e.to_string())?
        };

        let Some(document) = document else {
            return Err("document missing".to_string());
        };

        let bytes = ctx
            .blob_store
            .get(&document.blob_ref)
            .await
            .map_err(|e| e.to_string())?;

        let text = ctx
            .extractor
            .extract(&document.content_type, &bytes)
            .await
            .map_err(|e| e.to_string())?;

        Ok(Some(text))
    }

    async fn cancel_requested(ctx: &Arc<ExecutorContext>, task_id: Uuid) -> bool {
        let pool = ctx.db_pool.clone();
        run_db(pool, move |conn| {
            TaskQueue::is_cancel_requested(conn, task_id)
        })
        .await
        .unwrap_or(false)
    }

    async fn finish_cancelled(
        ctx: &Arc<ExecutorContext>,
        payload: &TaskPayload,
        task_id: Uuid,
        worker_id: &str,
    ) {
        let wrote = {
            let pool = ctx.db_pool.clone();
            let id = payload.transformation_id;
            run_db(pool, move |conn| {
                TransformationRepo::unscoped_cancel(conn, id)
            })
            .await
            .unwrap_or(false)
        };

        Self::ack(ctx, task_id, worker_id).await;

        if wrote {
            ctx.bus
                .publish(
                    workspace_topic(payload.workspace_id),
                    EventKind::TransformationFailed,
                    json!({
                        "id": payload.transformation_id,
                        "workspace_id": payload.workspace_id,
                        "reason": REASON_CANCELLED,
                    }),
                )
                .await;
            info!(transformation_id = %payload.transformation_id, "Transformation cancelled");
        }
    }

    async fn finish_failed(
        ctx: &Arc<ExecutorContext>,
        payload: &TaskPayload,
        task_id: Uuid,
        worker_id: &str,
        reason: &'static str,
    ) {
        let wrote = {
            let pool = ctx.db_pool.clone();
            let id = payload.transformation_id;
            run_db(pool, move |conn| {
                TransformationRepo::unscoped_fail(conn, id, reason)
            })
            .await
            .unwrap_or(false)
        };

        Self::ack(ctx, task_id, worker_id).await;

        if wrote {
            ctx.bus
                .publish(
                    workspace_topic(payload.workspace_id),
                    EventKind::TransformationFailed,
                    json!({
                        "id": payload.transformation_id,
                        "workspace_id": payload.workspace_id,
                        "reason": reason,
                    }),
                )
                .await;
            warn!(transformation_id = %payload.transformation_id, reason, "Transformation failed");
        }
    }

    async fn ack(ctx: &Arc<ExecutorContext>, task_id: Uuid, worker_id: &str) {
        let pool = ctx.db_pool.clone();
        let worker = worker_id.to_string();
        if let Err(e) = run_db(pool, move |conn| TaskQueue::ack(conn, task_id, &worker)).await {
            warn!(error = %e, task_id = %task_id, "Ack failed");
        }
    }
}

/// Truncates a result to a bounded preview on a character boundary.
pub fn preview(content: &str) -> String {
    if content.chars().count() <= RESULT_PREVIEW_CHARS {
        return content.to_string();
    }

    let truncated: String = content.chars().take(RESULT_PREVIEW_CHARS).collect();
    format!("{}...", truncated)
}

/// Runs a blocking database closure off the async runtime. Pooled
/// connections may carry a tenancy variable from a previous request-path
/// checkout; worker operations run with it cleared.
async fn run_db<T, E, F>(pool: DbPool, f: F) -> Result<T, E>
where
    T: Send + 'static,
    E: From<diesel::result::Error> + Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, E> + Send + 'static,
{
    use diesel::RunQueryDsl;

    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|_| E::from(diesel::result::Error::BrokenTransactionManager))?;

        diesel::sql_query("SELECT set_config('app.workspace_id', '', false)")
            .execute(&mut conn)
            .map_err(E::from)?;

        f(&mut conn)
    })
    .await
    .unwrap_or_else(|_| Err(E::from(diesel::result::Error::BrokenTransactionManager)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_bounds_length() {
        let short = "short result";
        assert_eq!(preview(short), short);

        let long = "x".repeat(500);
        let p = preview(&long);
        assert_eq!(p.chars().count(), RESULT_PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let long = "é".repeat(300);
        let p = preview(&long);
        assert!(p.starts_with('é'));
        assert_eq!(p.chars().count(), RESULT_PREVIEW_CHARS + 3);
    }
}
