//! Dual-write coordinator: durable-first upserts with a best-effort cache
//! mirror.
//!
//! Every write lands in the durable store first — it is the authority and the
//! only tier whose failure fails the operation. The cache write that follows
//! is logged on failure and otherwise ignored, since every cached projection
//! can be rebuilt. Transient store failures are retried with exponential
//! backoff under a per-operation timeout; merges are single atomic statements
//! and therefore safe to retry.

use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{instrument, warn};
use url::Url;

use postline_cache::Cache;
use postline_shared::{
    CacheTtls, MediaType, Metrics, Post, PostUpdate, PostlineError, MetricsUpdate, Result,
    RetryConfig,
};
use postline_storage::{NewMedia, Storage};

/// Coordinates writes across the durable store and the cache tier.
pub struct DualWriteCoordinator {
    storage: Arc<Storage>,
    cache: Arc<Cache>,
    retry: RetryConfig,
    ttls: CacheTtls,
}

impl DualWriteCoordinator {
    pub fn new(
        storage: Arc<Storage>,
        cache: Arc<Cache>,
        retry: RetryConfig,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            storage,
            cache,
            retry,
            ttls,
        }
    }

    /// Insert or enrich a post. Absent fields never clobber stored values;
    /// media URLs upsert media rows; carried counters are forwarded to
    /// [`DualWriteCoordinator::upsert_metrics`].
    #[instrument(skip_all, fields(url = %update.url))]
    pub async fn upsert_post(&self, update: &PostUpdate) -> Result<Post> {
        validate_post_url(&update.url)?;
        if update.author.trim().is_empty() {
            return Err(PostlineError::validation("author handle is required"));
        }

        self.with_retries("upsert_post", || self.storage.upsert_post(update))
            .await?;

        for original_url in &update.media_urls {
            let storage_key = media_storage_key(original_url);
            let media = NewMedia {
                post_url: &update.url,
                media_type: classify_media_type(original_url),
                original_url,
                storage_key: &storage_key,
                size_bytes: None,
                width: None,
                height: None,
            };
            if let Err(e) = self
                .with_retries("upsert_media", || self.storage.upsert_media(&media))
                .await
            {
                return Err(self.record_integrity(&update.url, "upsert_media", e).await);
            }
        }

        if let Some(counts) = &update.metrics {
            self.upsert_metrics(&update.url, counts).await?;
        }

        self.with_retries("get_post", || self.storage.get_post(&update.url))
            .await?
            .ok_or_else(|| {
                PostlineError::integrity(format!("post vanished after upsert: {}", update.url))
            })
    }

    /// Merge metric counters for a post and mirror the merged row into
    /// `metrics:{url}`. Returns the merged metrics with the recomputed score.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn upsert_metrics(&self, url: &str, counts: &MetricsUpdate) -> Result<Metrics> {
        validate_post_url(url)?;

        if let Err(e) = self
            .with_retries("upsert_metrics", || self.storage.upsert_metrics(url, counts))
            .await
        {
            return Err(self.record_integrity(url, "upsert_metrics", e).await);
        }

        let metrics = self
            .with_retries("get_metrics", || self.storage.get_metrics(url))
            .await?
            .ok_or_else(|| {
                PostlineError::integrity(format!("metrics vanished after upsert: {url}"))
            })?;

        // Cache second, best-effort: the durable store already holds the truth.
        if let Err(e) = self.cache.set_metrics(&metrics, self.ttls.metrics).await {
            warn!(%url, error = %e, "metrics cache write failed, continuing");
        }

        Ok(metrics)
    }

    /// Run a store operation under the per-operation timeout, retrying
    /// transient failures with exponential backoff.
    async fn with_retries<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.retry.op_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(PostlineError::TransientStore(format!(
                    "{op}: timed out after {:?}",
                    self.retry.op_timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff_base * 2u32.saturating_pow(attempt);
                    warn!(%op, attempt, error = %e, delay_ms = delay.as_millis() as u64,
                          "transient store failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Log an integrity failure to the system error log with context before
    /// surfacing it. The log write itself is best-effort.
    async fn record_integrity(&self, url: &str, op: &str, e: PostlineError) -> PostlineError {
        if matches!(e, PostlineError::DataIntegrity { .. }) {
            let context = serde_json::json!({ "operation": op }).to_string();
            if let Err(log_err) = self
                .storage
                .log_error("coordinator", Some(url), &e.to_string(), Some(&context))
                .await
            {
                warn!(%url, error = %log_err, "failed to record integrity error");
            }
        }
        e
    }
}

/// Reject records with no usable URL before any write is attempted.
fn validate_post_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(PostlineError::validation("post URL is required"));
    }
    Url::parse(url)
        .map_err(|e| PostlineError::validation(format!("invalid post URL {url:?}: {e}")))?;
    Ok(())
}

/// Classify a media asset from its URL extension.
fn classify_media_type(url: &str) -> MediaType {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    match path.rsplit('.').next() {
        Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "svg") => MediaType::Image,
        Some("mp4" | "mov" | "webm" | "avi" | "mkv") => MediaType::Video,
        Some("mp3" | "wav" | "ogg" | "m4a" | "flac") => MediaType::Audio,
        _ => MediaType::Document,
    }
}

/// Deterministic blob-store key for a media asset: sha-256 of the original
/// URL, so re-discovery always maps to the same key.
fn media_storage_key(original_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original_url.as_bytes());
    format!("media/{:x}", hasher.finalize())
}
