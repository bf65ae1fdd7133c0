//! Ephemeral TTL cache and stage-queue substrate.
//!
//! The [`Cache`] holds derived projections of the durable store — recent
//! metrics, ranking snapshots, task progress — plus the FIFO relay queues the
//! stage router hands records through. Everything here may be lost at any
//! time and rebuilt from the durable store; cache loss is never data loss.
//!
//! Key families mirror the deployed layout:
//! - `metrics:{url}` — recent counters, long TTL
//! - `ranking:{author}` — ordered snapshot, short TTL
//! - `task:{id}` — batch progress, medium TTL
//! - `queue:{stage}` — pending post URLs, removed only on consumer ack

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use postline_shared::{Metrics, PostlineError, Result, Stage, TaskProgress};

/// A cached value with its expiration deadline.
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process ephemeral store with per-entry TTLs and named FIFO queues.
///
/// All operations are fallible: the cache tier can be taken offline with
/// [`Cache::set_offline`] (an operational kill-switch), after which every
/// call returns [`PostlineError::CacheUnavailable`] and callers fall back to
/// the durable store.
pub struct Cache {
    entries: Mutex<HashMap<String, Entry>>,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    offline: AtomicBool,
}

impl Cache {
    /// Create an empty, online cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Take the cache tier offline (or bring it back). While offline every
    /// operation fails with `CacheUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(PostlineError::CacheUnavailable(
                "cache tier is offline".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Generic JSON entries
    // -----------------------------------------------------------------------

    async fn set_json<T: Serialize>(&self, key: String, value: &T, ttl: Duration) -> Result<()> {
        self.check_online()?;
        let json = serde_json::to_string(value)
            .map_err(|e| PostlineError::CacheUnavailable(format!("encode {key}: {e}")))?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            Entry {
                value: json,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => {
                let value = serde_json::from_str(&entry.value)
                    .map_err(|e| PostlineError::CacheUnavailable(format!("decode {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // metrics:{url}
    // -----------------------------------------------------------------------

    /// Store a metrics snapshot under `metrics:{url}`.
    pub async fn set_metrics(&self, metrics: &Metrics, ttl: Duration) -> Result<()> {
        self.set_json(metrics_key(&metrics.post_url), metrics, ttl).await
    }

    /// Read a metrics snapshot, or `None` on miss/expiry.
    pub async fn get_metrics(&self, url: &str) -> Result<Option<Metrics>> {
        self.get_json(&metrics_key(url)).await
    }

    // -----------------------------------------------------------------------
    // ranking:{author}
    // -----------------------------------------------------------------------

    /// Store an ordered `(url, score)` ranking snapshot for an author.
    pub async fn set_ranking(
        &self,
        author: &str,
        entries: &[(String, f64)],
        ttl: Duration,
    ) -> Result<()> {
        self.set_json(ranking_key(author), &entries, ttl).await
    }

    /// Read an author's ranking snapshot, or `None` on miss/expiry.
    pub async fn get_ranking(&self, author: &str) -> Result<Option<Vec<(String, f64)>>> {
        self.get_json(&ranking_key(author)).await
    }

    // -----------------------------------------------------------------------
    // task:{id}
    // -----------------------------------------------------------------------

    /// Store batch progress under `task:{id}`.
    pub async fn set_task(&self, progress: &TaskProgress, ttl: Duration) -> Result<()> {
        self.set_json(task_key(&progress.task_id), progress, ttl).await
    }

    /// Read batch progress, or `None` on miss/expiry.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskProgress>> {
        self.get_json(&task_key(task_id)).await
    }

    // -----------------------------------------------------------------------
    // queue:{stage}
    // -----------------------------------------------------------------------

    /// Append a post URL to a stage's relay queue. Duplicate enqueues of the
    /// same URL are permitted (at-least-once; fills are idempotent downstream).
    pub async fn enqueue(&self, stage: Stage, url: &str) -> Result<()> {
        self.check_online()?;
        let mut queues = self.queues.lock().await;
        queues
            .entry(queue_key(stage))
            .or_default()
            .push_back(url.to_string());
        debug!(stage = %stage, url, "enqueued");
        Ok(())
    }

    /// The next pending URL for a stage, without removing it. Entries leave
    /// the queue only via [`Cache::ack`].
    pub async fn next_pending(&self, stage: Stage) -> Result<Option<String>> {
        self.check_online()?;
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue_key(stage))
            .and_then(|q| q.front().cloned()))
    }

    /// Acknowledge successful consumption: removes the first queued
    /// occurrence of `url`. Returns whether an entry was removed.
    pub async fn ack(&self, stage: Stage, url: &str) -> Result<bool> {
        self.check_online()?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(&queue_key(stage)) else {
            return Ok(false);
        };
        match queue.iter().position(|entry| entry == url) {
            Some(idx) => {
                queue.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of entries pending for a stage.
    pub async fn queue_len(&self, stage: Stage) -> Result<usize> {
        self.check_online()?;
        let queues = self.queues.lock().await;
        Ok(queues.get(&queue_key(stage)).map_or(0, VecDeque::len))
    }

    /// Snapshot of a stage's pending URLs in FIFO order.
    pub async fn pending(&self, stage: Stage) -> Result<Vec<String>> {
        self.check_online()?;
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue_key(stage))
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Drop every expired entry. Returns the number removed. Expiry is also
    /// applied lazily on read, so calling this is optional housekeeping.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired(now));
        Ok(before - entries.len())
    }

    /// Drop all entries and queues.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        self.queues.lock().await.clear();
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

fn metrics_key(url: &str) -> String {
    format!("metrics:{url}")
}

fn ranking_key(author: &str) -> String {
    format!("ranking:{author}")
}

fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

fn queue_key(stage: Stage) -> String {
    format!("queue:{}", stage.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_metrics(url: &str, views: Option<u64>) -> Metrics {
        Metrics {
            post_url: url.into(),
            views,
            likes: 267,
            comments: 3,
            reposts: 0,
            shares: 1,
            score: postline_shared::score(views, 267, 3, 0, 1),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn metrics_roundtrip() {
        let cache = Cache::new();
        let metrics = sample_metrics("https://sm.example/p/1", Some(4000));
        cache
            .set_metrics(&metrics, Duration::from_secs(60))
            .await
            .expect("set");

        let found = cache
            .get_metrics("https://sm.example/p/1")
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(found.likes, 267);
        assert!((found.score - 4081.0).abs() < 1e-9);

        let miss = cache.get_metrics("https://sm.example/p/2").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = Cache::new();
        let metrics = sample_metrics("https://sm.example/p/1", None);
        cache
            .set_metrics(&metrics, Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let found = cache.get_metrics("https://sm.example/p/1").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn ranking_snapshot_overwrites() {
        let cache = Cache::new();
        let first = vec![("https://sm.example/p/1".to_string(), 4081.0)];
        cache
            .set_ranking("@ada", &first, Duration::from_secs(60))
            .await
            .unwrap();

        let second = vec![
            ("https://sm.example/p/2".to_string(), 9000.0),
            ("https://sm.example/p/1".to_string(), 4081.0),
        ];
        cache
            .set_ranking("@ada", &second, Duration::from_secs(60))
            .await
            .unwrap();

        let snapshot = cache.get_ranking("@ada").await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, "https://sm.example/p/2");
    }

    #[tokio::test]
    async fn task_progress_roundtrip() {
        let cache = Cache::new();
        let progress = TaskProgress {
            task_id: "task-1".into(),
            status: "running".into(),
            progress: 0.5,
            message: "25/50 posts".into(),
        };
        cache
            .set_task(&progress, Duration::from_secs(60))
            .await
            .unwrap();

        let found = cache.get_task("task-1").await.unwrap().unwrap();
        assert_eq!(found.status, "running");
        assert!((found.progress - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn queue_is_fifo_and_ack_only() {
        let cache = Cache::new();
        cache
            .enqueue(Stage::VisionFill, "https://sm.example/p/1")
            .await
            .unwrap();
        cache
            .enqueue(Stage::VisionFill, "https://sm.example/p/2")
            .await
            .unwrap();

        // Peeking does not consume.
        let next = cache.next_pending(Stage::VisionFill).await.unwrap();
        assert_eq!(next.as_deref(), Some("https://sm.example/p/1"));
        assert_eq!(cache.queue_len(Stage::VisionFill).await.unwrap(), 2);

        // Only ack removes.
        assert!(
            cache
                .ack(Stage::VisionFill, "https://sm.example/p/1")
                .await
                .unwrap()
        );
        let next = cache.next_pending(Stage::VisionFill).await.unwrap();
        assert_eq!(next.as_deref(), Some("https://sm.example/p/2"));

        // Ack of an absent URL is a no-op.
        assert!(
            !cache
                .ack(Stage::VisionFill, "https://sm.example/p/9")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_enqueues_are_kept() {
        let cache = Cache::new();
        for _ in 0..2 {
            cache
                .enqueue(Stage::VisionFill, "https://sm.example/p/1")
                .await
                .unwrap();
        }
        assert_eq!(cache.queue_len(Stage::VisionFill).await.unwrap(), 2);

        // One ack removes exactly one occurrence.
        cache
            .ack(Stage::VisionFill, "https://sm.example/p/1")
            .await
            .unwrap();
        assert_eq!(cache.queue_len(Stage::VisionFill).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn queues_are_per_stage() {
        let cache = Cache::new();
        cache
            .enqueue(Stage::VisionFill, "https://sm.example/p/1")
            .await
            .unwrap();
        assert_eq!(cache.queue_len(Stage::MediaDownload).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_cache_fails_every_operation() {
        let cache = Cache::new();
        cache.set_offline(true);

        let metrics = sample_metrics("https://sm.example/p/1", Some(1));
        let err = cache
            .set_metrics(&metrics, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, PostlineError::CacheUnavailable(_)));

        let err = cache
            .enqueue(Stage::VisionFill, "https://sm.example/p/1")
            .await
            .unwrap_err();
        assert!(matches!(err, PostlineError::CacheUnavailable(_)));

        // Back online, operations succeed again.
        cache.set_offline(false);
        cache
            .set_metrics(&metrics, Duration::from_secs(60))
            .await
            .expect("online again");
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let cache = Cache::new();
        let short = sample_metrics("https://sm.example/p/1", Some(1));
        let long = sample_metrics("https://sm.example/p/2", Some(2));
        cache
            .set_metrics(&short, Duration::from_millis(10))
            .await
            .unwrap();
        cache
            .set_metrics(&long, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = cache.purge_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(
            cache
                .get_metrics("https://sm.example/p/2")
                .await
                .unwrap()
                .is_some()
        );
    }
}
