//! Ranking engine: top-K posts per author from the generated score.
//!
//! The durable store computes the authoritative ordering (score descending,
//! most-recent update first on ties); the cache holds a ready-to-serve
//! snapshot under a short TTL as a pure read-through accelerator. A cache
//! miss — or a cache outage — transparently recomputes from the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use postline_cache::Cache;
use postline_shared::{PostlineError, RankedPost, Result};
use postline_storage::Storage;

pub struct RankingEngine {
    storage: Arc<Storage>,
    cache: Arc<Cache>,
    /// Hard cap on `k`; requests above it are clamped.
    max_top_k: usize,
    snapshot_ttl: Duration,
}

impl RankingEngine {
    pub fn new(
        storage: Arc<Storage>,
        cache: Arc<Cache>,
        max_top_k: usize,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            cache,
            max_top_k,
            snapshot_ttl,
        }
    }

    /// The author's top `k` posts, descending by score. `k` is clamped to
    /// the configured maximum.
    #[instrument(skip_all, fields(author = %author, k = k))]
    pub async fn top_posts(&self, author: &str, k: usize) -> Result<Vec<RankedPost>> {
        if author.trim().is_empty() {
            return Err(PostlineError::validation("author handle is required"));
        }
        let k = k.min(self.max_top_k);
        if k == 0 {
            return Ok(Vec::new());
        }

        match self.cache.get_ranking(author).await {
            Ok(Some(snapshot)) => {
                debug!(%author, "serving ranking snapshot from cache");
                return Ok(to_ranked(&snapshot, k));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%author, error = %e, "ranking cache read failed, recomputing");
            }
        }

        // Snapshot at the cap so later smaller-k requests hit the cache too.
        let rows = self.storage.top_posts(author, self.max_top_k as u32).await?;

        if let Err(e) = self.cache.set_ranking(author, &rows, self.snapshot_ttl).await {
            warn!(%author, error = %e, "ranking snapshot write failed, continuing");
        }

        Ok(to_ranked(&rows, k))
    }
}

fn to_ranked(rows: &[(String, f64)], k: usize) -> Vec<RankedPost> {
    rows.iter()
        .take(k)
        .enumerate()
        .map(|(i, (url, score))| RankedPost {
            url: url.clone(),
            score: *score,
            rank: (i + 1) as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use postline_shared::{MetricsUpdate, PostUpdate};
    use uuid::Uuid;

    async fn fixture() -> (RankingEngine, Arc<Storage>, Arc<Cache>) {
        let tmp = std::env::temp_dir().join(format!("pl_rank_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
        let cache = Arc::new(Cache::new());
        let engine = RankingEngine::new(
            storage.clone(),
            cache.clone(),
            30,
            Duration::from_secs(600),
        );
        (engine, storage, cache)
    }

    async fn seed(storage: &Storage, author: &str, index: u32, views: u64) -> String {
        let url = format!("https://sm.example/{author}/p/{index}");
        storage
            .upsert_post(&PostUpdate {
                url: url.clone(),
                author: author.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        storage
            .upsert_metrics(
                &url,
                &MetricsUpdate {
                    views: Some(views),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        url
    }

    #[tokio::test]
    async fn returns_descending_with_ranks() {
        let (engine, storage, _cache) = fixture().await;
        seed(&storage, "@ada", 1, 100).await;
        let top_url = seed(&storage, "@ada", 2, 900).await;
        seed(&storage, "@ada", 3, 500).await;

        let top = engine.top_posts("@ada", 10).await.unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].url, top_url);
        assert_eq!(top[0].rank, 1);
        assert!(top[0].score > top[1].score);
        assert!(top[1].score > top[2].score);
        assert_eq!(top[2].rank, 3);
    }

    #[tokio::test]
    async fn k_is_clamped_to_the_configured_max() {
        let (engine, storage, _cache) = fixture().await;
        for i in 0..40 {
            seed(&storage, "@ada", i, 1000 + i as u64).await;
        }

        let top = engine.top_posts("@ada", 1000).await.unwrap();
        assert_eq!(top.len(), 30);
    }

    #[tokio::test]
    async fn zero_k_returns_empty() {
        let (engine, storage, _cache) = fixture().await;
        seed(&storage, "@ada", 1, 100).await;
        assert!(engine.top_posts("@ada", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_author_is_rejected() {
        let (engine, _storage, _cache) = fixture().await;
        assert!(matches!(
            engine.top_posts("  ", 5).await,
            Err(PostlineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn snapshot_serves_repeat_queries() {
        let (engine, storage, cache) = fixture().await;
        let url = seed(&storage, "@ada", 1, 100).await;

        let first = engine.top_posts("@ada", 5).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(cache.get_ranking("@ada").await.unwrap().is_some());

        // A store change inside the TTL is not visible until expiry — the
        // snapshot bounds staleness, it does not chase every write.
        storage
            .upsert_metrics(
                &url,
                &MetricsUpdate {
                    views: Some(9000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let second = engine.top_posts("@ada", 5).await.unwrap();
        assert_eq!(second[0].score, first[0].score);
    }

    #[tokio::test]
    async fn expired_snapshot_recomputes() {
        let (_engine, storage, cache) = fixture().await;
        let engine = RankingEngine::new(
            storage.clone(),
            cache.clone(),
            30,
            Duration::from_millis(10),
        );
        let url = seed(&storage, "@ada", 1, 100).await;

        engine.top_posts("@ada", 5).await.unwrap();
        storage
            .upsert_metrics(
                &url,
                &MetricsUpdate {
                    views: Some(9000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let refreshed = engine.top_posts("@ada", 5).await.unwrap();
        assert!((refreshed[0].score - 9000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_store() {
        let (engine, storage, cache) = fixture().await;
        seed(&storage, "@ada", 1, 100).await;

        cache.set_offline(true);
        let top = engine.top_posts("@ada", 5).await.unwrap();
        assert_eq!(top.len(), 1);
        assert!((top[0].score - 100.0).abs() < 1e-9);
    }
}
