//! Batch ingest orchestration: persist → route, with per-item outcomes.
//!
//! Stage processors hand the pipeline a batch of enrichment outputs. Each
//! post is persisted through the dual-write coordinator and classified by the
//! stage router under a bounded concurrency limit. A single bad record never
//! aborts the batch; progress is mirrored into `task:{id}` as items finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use postline_cache::Cache;
use postline_shared::{PostUpdate, Result, TaskProgress};

use crate::coordinator::DualWriteCoordinator;
use crate::router::{RouteOutcome, StageRouter};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a post finishes (successfully or not).
    fn post_processed(&self, url: &str, current: usize, total: usize);
    /// Called when the batch completes.
    fn done(&self, result: &IngestResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn post_processed(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &IngestResult) {}
}

/// Per-post outcome within a batch.
#[derive(Debug)]
pub struct IngestOutcome {
    pub url: String,
    /// Routing outcome when the post was persisted and classified.
    pub routed: Option<RouteOutcome>,
    /// Error detail when the post failed; the batch continued without it.
    pub error: Option<String>,
}

impl IngestOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a completed ingest batch.
#[derive(Debug)]
pub struct IngestResult {
    /// Task id under which progress was mirrored to the cache.
    pub task_id: String,
    pub processed: usize,
    pub complete: usize,
    pub queued_for_vision: usize,
    pub failed: usize,
    pub outcomes: Vec<IngestOutcome>,
    pub elapsed: Duration,
}

pub struct IngestPipeline {
    coordinator: Arc<DualWriteCoordinator>,
    router: Arc<StageRouter>,
    cache: Arc<Cache>,
    concurrency: usize,
    task_ttl: Duration,
}

impl IngestPipeline {
    pub fn new(
        coordinator: Arc<DualWriteCoordinator>,
        router: Arc<StageRouter>,
        cache: Arc<Cache>,
        concurrency: usize,
        task_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            router,
            cache,
            concurrency: concurrency.max(1),
            task_ttl,
        }
    }

    /// Ingest a batch of enrichment outputs. Returns per-item outcomes —
    /// partial success is always observable, never an all-or-nothing abort.
    #[instrument(skip_all, fields(posts = updates.len()))]
    pub async fn ingest(
        &self,
        updates: Vec<PostUpdate>,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestResult> {
        let start = Instant::now();
        let task_id = Uuid::now_v7().to_string();
        let total = updates.len();

        info!(task_id = %task_id, total, "starting ingest batch");
        progress.phase("Persisting and routing posts");
        self.report_task(&task_id, "running", 0.0, &format!("0/{total} posts"))
            .await;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        for update in updates {
            let sem = semaphore.clone();
            let coordinator = self.coordinator.clone();
            let router = self.router.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let url = update.url.clone();
                let result = async {
                    coordinator.upsert_post(&update).await?;
                    router.route_post(&url).await
                }
                .await;
                (url, result)
            }));
        }

        let mut outcomes: Vec<IngestOutcome> = Vec::with_capacity(total);
        let mut complete = 0usize;
        let mut queued_for_vision = 0usize;
        let mut failed = 0usize;

        for (i, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok((url, Ok(routed))) => {
                    if routed.complete {
                        complete += 1;
                    }
                    if routed.needs_vision {
                        queued_for_vision += 1;
                    }
                    IngestOutcome {
                        url,
                        routed: Some(routed),
                        error: None,
                    }
                }
                Ok((url, Err(e))) => {
                    failed += 1;
                    warn!(%url, error = %e, "post failed, batch continues");
                    IngestOutcome {
                        url,
                        routed: None,
                        error: Some(e.to_string()),
                    }
                }
                Err(e) => {
                    failed += 1;
                    IngestOutcome {
                        url: String::new(),
                        routed: None,
                        error: Some(format!("task join failed: {e}")),
                    }
                }
            };

            progress.post_processed(&outcome.url, i + 1, total);
            let fraction = (i + 1) as f32 / total.max(1) as f32;
            self.report_task(
                &task_id,
                "running",
                fraction,
                &format!("{}/{total} posts", i + 1),
            )
            .await;
            outcomes.push(outcome);
        }

        let status = if failed == total && total > 0 {
            "failed"
        } else {
            "completed"
        };
        self.report_task(
            &task_id,
            status,
            1.0,
            &format!("{complete} complete, {queued_for_vision} queued for vision, {failed} failed"),
        )
        .await;

        let result = IngestResult {
            task_id,
            processed: total,
            complete,
            queued_for_vision,
            failed,
            outcomes,
            elapsed: start.elapsed(),
        };

        progress.done(&result);
        info!(
            task_id = %result.task_id,
            processed = result.processed,
            complete = result.complete,
            queued_for_vision = result.queued_for_vision,
            failed = result.failed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "ingest batch finished"
        );

        Ok(result)
    }

    /// Processing-status query: current progress for a task, if the cache
    /// still holds it.
    pub async fn status(&self, task_id: &str) -> Result<Option<TaskProgress>> {
        self.cache.get_task(task_id).await
    }

    /// Mirror task progress into the cache, best-effort.
    async fn report_task(&self, task_id: &str, status: &str, fraction: f32, message: &str) {
        let progress = TaskProgress {
            task_id: task_id.to_string(),
            status: status.to_string(),
            progress: fraction,
            message: message.to_string(),
        };
        if let Err(e) = self.cache.set_task(&progress, self.task_ttl).await {
            warn!(%task_id, error = %e, "task progress write failed, continuing");
        }
    }
}
