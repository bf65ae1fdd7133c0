//! Stage router: completeness classification and the vision-fill relay.
//!
//! A record is complete when `views` is present — views is the one counter
//! the upstream enrichment guarantees, so its absence is the compensation
//! trigger. Incomplete records append a pending processing record and enter
//! the `queue:vision_fill` relay at-least-once; duplicate enqueues are
//! tolerated because fills are idempotent downstream.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use postline_cache::Cache;
use postline_shared::{
    PostlineError, Result, RouterConfig, Stage, StageStatus,
};
use postline_storage::Storage;

use crate::registry::AgentHealthRegistry;

/// Per-URL routing outcome.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub url: String,
    /// Whether the record has `views` and needs no compensation.
    pub complete: bool,
    /// Whether the record was classified for vision fill.
    pub needs_vision: bool,
    /// Whether the relay enqueue succeeded (false when the cache tier is
    /// down; the pending processing record still marks the debt).
    pub queued: bool,
    /// Whether an active agent currently advertises the vision stage.
    pub stage_available: bool,
}

/// What happened to a failed stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-enqueued for another attempt.
    Retrying { attempt: u32 },
    /// Attempt bound exhausted; surfaced to the system error log.
    Terminal,
}

pub struct StageRouter {
    storage: Arc<Storage>,
    cache: Arc<Cache>,
    registry: Arc<AgentHealthRegistry>,
    config: RouterConfig,
}

impl StageRouter {
    pub fn new(
        storage: Arc<Storage>,
        cache: Arc<Cache>,
        registry: Arc<AgentHealthRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            registry,
            config,
        }
    }

    /// Classify one post and, when incomplete, relay it to the vision-fill
    /// queue. Routing is order-independent per key and safe to repeat.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn route_post(&self, url: &str) -> Result<RouteOutcome> {
        if url.trim().is_empty() {
            return Err(PostlineError::validation("post URL is required"));
        }

        let metrics = self.storage.get_metrics(url).await?;
        let complete = metrics.as_ref().is_some_and(|m| m.views.is_some());

        if complete {
            return Ok(RouteOutcome {
                url: url.to_string(),
                complete: true,
                needs_vision: false,
                queued: false,
                stage_available: true,
            });
        }

        let attempt = self.storage.latest_attempt(url, Stage::VisionFill).await? + 1;
        self.storage
            .insert_processing_record(url, Stage::VisionFill, StageStatus::Pending, attempt)
            .await?;

        let queued = match self.cache.enqueue(Stage::VisionFill, url).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%url, error = %e, "vision queue unavailable, pending record remains");
                false
            }
        };

        let stage_available = self.registry.stage_available(Stage::VisionFill).await?;
        if !stage_available {
            info!(%url, "vision stage has no active agent; entry stays queued");
        }

        Ok(RouteOutcome {
            url: url.to_string(),
            complete: false,
            needs_vision: true,
            queued,
            stage_available,
        })
    }

    /// Route an ordered batch, returning one outcome per URL. Oversized
    /// batches are rejected up front; within an accepted batch a single bad
    /// record never aborts the rest.
    pub async fn route_batch(
        &self,
        urls: &[String],
    ) -> Result<Vec<(String, Result<RouteOutcome>)>> {
        if urls.len() > self.config.max_batch {
            return Err(PostlineError::validation(format!(
                "batch of {} exceeds the bound of {}",
                urls.len(),
                self.config.max_batch
            )));
        }

        let mut outcomes = Vec::with_capacity(urls.len());
        for url in urls {
            outcomes.push((url.clone(), self.route_post(url).await));
        }
        Ok(outcomes)
    }

    /// Next queued URL for a stage, for a dispatcher to hand its processor.
    /// Fails with `StageUnavailable` while no active agent advertises the
    /// stage — callers defer and retry later; the entry is never consumed.
    pub async fn next_for_stage(&self, stage: Stage) -> Result<Option<String>> {
        if !self.registry.stage_available(stage).await? {
            return Err(PostlineError::StageUnavailable {
                stage: stage.as_str().to_string(),
            });
        }
        self.cache.next_pending(stage).await
    }

    /// Mark a stage attempt completed and acknowledge its queue entry.
    #[instrument(skip_all, fields(url = %url, stage = %stage))]
    pub async fn complete_stage(&self, url: &str, stage: Stage) -> Result<()> {
        match self.storage.open_processing_record(url, stage).await? {
            Some(id) => {
                self.storage
                    .finish_processing_record(id, StageStatus::Completed, None)
                    .await?;
            }
            None => {
                // Completion without a pending record still belongs in the
                // audit trail (idempotent consumers may re-complete).
                let attempt = self.storage.latest_attempt(url, stage).await?.max(1);
                self.storage
                    .insert_processing_record(url, stage, StageStatus::Completed, attempt)
                    .await?;
            }
        }

        if let Err(e) = self.cache.ack(stage, url).await {
            warn!(%url, error = %e, "queue ack failed; duplicate delivery is tolerated");
        }
        Ok(())
    }

    /// Mark a stage attempt failed. Below the attempt bound the record is
    /// re-enqueued; at the bound the failure is terminal and logged with
    /// context to the system error log.
    #[instrument(skip_all, fields(url = %url, stage = %stage))]
    pub async fn fail_stage(
        &self,
        url: &str,
        stage: Stage,
        error: &str,
    ) -> Result<FailureDisposition> {
        if let Some(id) = self.storage.open_processing_record(url, stage).await? {
            self.storage
                .finish_processing_record(id, StageStatus::Failed, Some(error))
                .await?;
        }
        // The failed attempt leaves the relay either way; retries re-enter it.
        if let Err(e) = self.cache.ack(stage, url).await {
            warn!(%url, error = %e, "queue ack failed during failure handling");
        }

        let attempts = self.storage.latest_attempt(url, stage).await?;
        if attempts < self.config.max_attempts {
            let attempt = attempts + 1;
            self.storage
                .insert_processing_record(url, stage, StageStatus::Pending, attempt)
                .await?;
            if let Err(e) = self.cache.enqueue(stage, url).await {
                warn!(%url, error = %e, "re-enqueue failed, pending record remains");
            }
            info!(%url, attempt, "stage attempt failed, re-enqueued");
            return Ok(FailureDisposition::Retrying { attempt });
        }

        let context = serde_json::json!({
            "stage": stage.as_str(),
            "attempts": attempts,
        })
        .to_string();
        self.storage
            .log_error("router", Some(url), error, Some(&context))
            .await?;
        warn!(%url, attempts, "stage failure is terminal");
        Ok(FailureDisposition::Terminal)
    }
}
