//! libSQL durable store — the pipeline's source of truth.
//!
//! The [`Storage`] struct wraps a libSQL database holding posts, metrics,
//! media, processing history, the agent registry, health history, the system
//! error log, and crawl checkpoints.
//!
//! **Write rules:**
//! - Every post/metrics/media write is a single atomic
//!   `INSERT ... ON CONFLICT ... DO UPDATE` with `COALESCE` field merges, so
//!   concurrent writers never lose unrelated fields and partial updates never
//!   null anything out.
//! - `metrics.score` is a stored generated column; it is never a write
//!   parameter and is always consistent with the counters.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

use postline_shared::{
    AgentDescriptor, AgentRegistration, AgentStatus, HealthStatus, MediaRef, MediaStatus,
    MediaType, Metrics, MetricsUpdate, Post, PostUpdate, PostlineError, ProbeOutcome,
    ProcessingRecord, Result, Stage, StageStatus,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PostlineError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(store_err)?;

        let conn = db.connect().map_err(store_err)?;

        // Referential integrity is load-bearing: orphan metrics/media rows
        // must surface as DataIntegrity, not silently persist.
        conn.execute("PRAGMA foreign_keys = ON", params![])
            .await
            .map_err(store_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PostlineError::TransientStore(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Post operations
    // -----------------------------------------------------------------------

    /// Insert or merge a post. Absent fields keep their stored values;
    /// `last_seen`/`updated_at` advance on every call. The whole merge is one
    /// atomic statement.
    pub async fn upsert_post(&self, update: &PostUpdate) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tags_json = match &update.tags {
            Some(tags) => Some(
                serde_json::to_string(tags)
                    .map_err(|e| PostlineError::validation(format!("tags encode: {e}")))?,
            ),
            None => None,
        };

        self.conn
            .execute(
                "INSERT INTO posts (url, author, markdown, tags_json, published_at,
                                    created_at, updated_at, last_seen)
                 VALUES (?1, ?2, ?3, COALESCE(?4, '[]'), ?5, ?6, ?6, ?6)
                 ON CONFLICT(url) DO UPDATE SET
                   author       = excluded.author,
                   markdown     = COALESCE(?3, posts.markdown),
                   tags_json    = COALESCE(?4, posts.tags_json),
                   published_at = COALESCE(?5, posts.published_at),
                   updated_at   = ?6,
                   last_seen    = ?6",
                params![
                    update.url.as_str(),
                    update.author.as_str(),
                    update.markdown.as_deref(),
                    tags_json.as_deref(),
                    update.published_at.map(|t| t.to_rfc3339()),
                    now.as_str(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Get a post by URL.
    pub async fn get_post(&self, url: &str) -> Result<Option<Post>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, author, markdown, tags_json, published_at,
                        created_at, updated_at, last_seen
                 FROM posts WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_post(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Metrics operations
    // -----------------------------------------------------------------------

    /// Insert or merge metric counters. Absent counters keep their stored
    /// values (or default to 0 on first insert; `views` stays NULL until
    /// supplied). The generated `score` column recomputes automatically.
    pub async fn upsert_metrics(&self, url: &str, update: &MetricsUpdate) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO metrics (post_url, views, likes, comments, reposts, shares, updated_at)
                 VALUES (?1, ?2, COALESCE(?3, 0), COALESCE(?4, 0), COALESCE(?5, 0),
                         COALESCE(?6, 0), ?7)
                 ON CONFLICT(post_url) DO UPDATE SET
                   views      = COALESCE(?2, metrics.views),
                   likes      = COALESCE(?3, metrics.likes),
                   comments   = COALESCE(?4, metrics.comments),
                   reposts    = COALESCE(?5, metrics.reposts),
                   shares     = COALESCE(?6, metrics.shares),
                   updated_at = ?7",
                params![
                    url,
                    update.views.map(|v| v as i64),
                    update.likes.map(|v| v as i64),
                    update.comments.map(|v| v as i64),
                    update.reposts.map(|v| v as i64),
                    update.shares.map(|v| v as i64),
                    now.as_str(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Get metrics (including the generated score) for a post.
    pub async fn get_metrics(&self, url: &str) -> Result<Option<Metrics>> {
        let mut rows = self
            .conn
            .query(
                "SELECT post_url, views, likes, comments, reposts, shares, score, updated_at
                 FROM metrics WHERE post_url = ?1",
                params![url],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_metrics(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Media operations
    // -----------------------------------------------------------------------

    /// Insert or merge a media row. `(post_url, original_url)` is the dedup
    /// identity — re-discovering an asset refreshes metadata without creating
    /// a new row or regressing its processing status.
    pub async fn upsert_media(&self, media: &NewMedia<'_>) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO media (id, post_url, media_type, original_url, storage_key,
                                    status, size_bytes, width, height, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(post_url, original_url) DO UPDATE SET
                   media_type  = excluded.media_type,
                   storage_key = excluded.storage_key,
                   size_bytes  = COALESCE(?6, media.size_bytes),
                   width       = COALESCE(?7, media.width),
                   height      = COALESCE(?8, media.height),
                   updated_at  = ?9",
                params![
                    id.as_str(),
                    media.post_url,
                    media.media_type.as_str(),
                    media.original_url,
                    media.storage_key,
                    media.size_bytes.map(|v| v as i64),
                    media.width.map(i64::from),
                    media.height.map(i64::from),
                    now.as_str(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Advance a media row's processing status.
    pub async fn set_media_status(
        &self,
        post_url: &str,
        original_url: &str,
        status: MediaStatus,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE media SET status = ?1, updated_at = ?2
                 WHERE post_url = ?3 AND original_url = ?4",
                params![status.as_str(), now.as_str(), post_url, original_url],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// List all media for a post, oldest first.
    pub async fn list_media(&self, post_url: &str) -> Result<Vec<MediaRef>> {
        let mut rows = self
            .conn
            .query(
                "SELECT post_url, media_type, original_url, storage_key, status,
                        size_bytes, width, height, created_at, updated_at
                 FROM media WHERE post_url = ?1 ORDER BY created_at",
                params![post_url],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_media(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Processing log
    // -----------------------------------------------------------------------

    /// Append a processing record for a (post, stage) attempt. Returns the
    /// row id so the attempt can be finished later.
    pub async fn insert_processing_record(
        &self,
        post_url: &str,
        stage: Stage,
        status: StageStatus,
        attempt: u32,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO processing_log (post_url, stage, status, attempt, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    post_url,
                    stage.as_str(),
                    status.as_str(),
                    attempt as i64,
                    now.as_str(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Finish a pending attempt with its terminal status. Completed rows are
    /// never touched again; retries append new attempts instead.
    pub async fn finish_processing_record(
        &self,
        id: i64,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE processing_log SET status = ?1, finished_at = ?2, error = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![status.as_str(), now.as_str(), error, id],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// All processing records for a post, oldest first.
    pub async fn list_processing_records(&self, post_url: &str) -> Result<Vec<ProcessingRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, post_url, stage, status, attempt, started_at, finished_at, error
                 FROM processing_log WHERE post_url = ?1 ORDER BY id",
                params![post_url],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Id of the most recent still-pending record for a (post, stage), if any.
    pub async fn open_processing_record(&self, post_url: &str, stage: Stage) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM processing_log
                 WHERE post_url = ?1 AND stage = ?2 AND status = 'pending'
                 ORDER BY id DESC LIMIT 1",
                params![post_url, stage.as_str()],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<i64>(0).map_err(store_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Highest attempt number recorded for a (post, stage), or 0.
    pub async fn latest_attempt(&self, post_url: &str, stage: Stage) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(attempt) FROM processing_log WHERE post_url = ?1 AND stage = ?2",
                params![post_url, stage.as_str()],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u32),
            Ok(None) => Ok(0),
            Err(e) => Err(store_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Agent registry
    // -----------------------------------------------------------------------

    /// Register an agent. Re-registering an existing name refreshes its
    /// declared capabilities/metadata and resets status to active;
    /// `registered_at` and the health history are preserved.
    pub async fn upsert_agent(&self, registration: &AgentRegistration) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let capabilities_json = serde_json::to_string(&registration.capabilities)
            .map_err(|e| PostlineError::validation(format!("capabilities encode: {e}")))?;
        let metadata_json = match &registration.metadata {
            Some(value) => Some(
                serde_json::to_string(value)
                    .map_err(|e| PostlineError::validation(format!("metadata encode: {e}")))?,
            ),
            None => None,
        };

        self.conn
            .execute(
                "INSERT INTO agents (name, description, version, base_url, health_url,
                                     capabilities_json, metadata_json, status, last_seen,
                                     error_count, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, 0, ?8)
                 ON CONFLICT(name) DO UPDATE SET
                   description       = excluded.description,
                   version           = excluded.version,
                   base_url          = excluded.base_url,
                   health_url        = excluded.health_url,
                   capabilities_json = excluded.capabilities_json,
                   metadata_json     = excluded.metadata_json,
                   status            = 'active',
                   last_seen         = ?8",
                params![
                    registration.name.as_str(),
                    registration.description.as_str(),
                    registration.version.as_str(),
                    registration.base_url.as_str(),
                    registration.health_url.as_str(),
                    capabilities_json.as_str(),
                    metadata_json.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Get one agent descriptor by name.
    pub async fn get_agent(&self, name: &str) -> Result<Option<AgentDescriptor>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, description, version, base_url, health_url, capabilities_json,
                        metadata_json, status, last_seen, error_count, registered_at
                 FROM agents WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_agent(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Every registered agent, most-recently-seen first.
    pub async fn list_agents(&self) -> Result<Vec<AgentDescriptor>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, description, version, base_url, health_url, capabilities_json,
                        metadata_json, status, last_seen, error_count, registered_at
                 FROM agents ORDER BY last_seen DESC",
                params![],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_agent(&row)?);
        }
        Ok(results)
    }

    /// All agents with the given status, most-recently-seen first.
    pub async fn list_agents_by_status(&self, status: AgentStatus) -> Result<Vec<AgentDescriptor>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, description, version, base_url, health_url, capabilities_json,
                        metadata_json, status, last_seen, error_count, registered_at
                 FROM agents WHERE status = ?1 ORDER BY last_seen DESC",
                params![status.as_str()],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_agent(&row)?);
        }
        Ok(results)
    }

    /// Fold a health outcome into an agent's rolling state.
    pub async fn set_agent_state(
        &self,
        name: &str,
        status: AgentStatus,
        error_count: u32,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE agents SET status = ?1, error_count = ?2, last_seen = ?3 WHERE name = ?4",
                params![status.as_str(), error_count as i64, now.as_str(), name],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Health history
    // -----------------------------------------------------------------------

    /// Append a probe outcome to the immutable health history.
    pub async fn insert_health_check(&self, agent_name: &str, outcome: &ProbeOutcome) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO health_history (agent_name, status, latency_ms, error, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent_name,
                    outcome.status.as_str(),
                    outcome.latency_ms as i64,
                    outcome.error.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Most recent health checks for an agent, newest first.
    pub async fn recent_health(&self, agent_name: &str, limit: u32) -> Result<Vec<HealthRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, latency_ms, error, checked_at
                 FROM health_history WHERE agent_name = ?1
                 ORDER BY id DESC LIMIT ?2",
                params![agent_name, limit],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let status_str: String = row.get(0).map_err(store_err)?;
            results.push(HealthRecord {
                status: status_str
                    .parse::<HealthStatus>()
                    .map_err(PostlineError::integrity)?,
                latency_ms: row.get::<i64>(1).unwrap_or(0) as u64,
                error: row.get::<String>(2).ok(),
                checked_at: parse_ts(&row.get::<String>(3).map_err(store_err)?)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Error log
    // -----------------------------------------------------------------------

    /// Record a per-record failure with full context; the pipeline continues.
    pub async fn log_error(
        &self,
        scope: &str,
        post_url: Option<&str>,
        message: &str,
        context_json: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO error_log (scope, post_url, message, context_json, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![scope, post_url, message, context_json, now.as_str()],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Most recent error-log entries, newest first. Returns
    /// `(scope, post_url, message)` tuples.
    pub async fn recent_errors(
        &self,
        limit: u32,
    ) -> Result<Vec<(String, Option<String>, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT scope, post_url, message FROM error_log ORDER BY id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0).map_err(store_err)?,
                row.get::<String>(1).ok(),
                row.get::<String>(2).map_err(store_err)?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Ranking query
    // -----------------------------------------------------------------------

    /// Top posts for an author by generated score, descending; ties broken by
    /// most-recent metrics update, then URL for full determinism.
    pub async fn top_posts(&self, author: &str, limit: u32) -> Result<Vec<(String, f64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT p.url, m.score
                 FROM posts p JOIN metrics m ON m.post_url = p.url
                 WHERE p.author = ?1
                 ORDER BY m.score DESC, m.updated_at DESC, p.url
                 LIMIT ?2",
                params![author, limit],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0).map_err(store_err)?,
                row.get::<f64>(1).map_err(store_err)?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Crawl checkpoints
    // -----------------------------------------------------------------------

    /// Latest upstream post id seen for an author, for incremental re-crawl.
    pub async fn get_crawl_state(&self, author: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT latest_post_id FROM crawl_state WHERE author = ?1",
                params![author],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(store_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Advance an author's crawl checkpoint.
    pub async fn set_crawl_state(&self, author: &str, latest_post_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_state (author, latest_post_id, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(author) DO UPDATE SET
                   latest_post_id = excluded.latest_post_id,
                   updated_at     = excluded.updated_at",
                params![author, latest_post_id, now.as_str()],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Support types
// ---------------------------------------------------------------------------

/// Input for a media upsert; the row id and timestamps are assigned here.
#[derive(Debug, Clone)]
pub struct NewMedia<'a> {
    pub post_url: &'a str,
    pub media_type: MediaType,
    pub original_url: &'a str,
    pub storage_key: &'a str,
    pub size_bytes: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One row from the health history.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Map a libSQL error onto the taxonomy: referential violations are fatal
/// per-record integrity failures; everything else is transient and retryable.
fn store_err(e: libsql::Error) -> PostlineError {
    let message = e.to_string();
    if message.contains("FOREIGN KEY") {
        PostlineError::DataIntegrity { message }
    } else {
        PostlineError::TransientStore(message)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PostlineError::integrity(format!("invalid timestamp {s:?}: {e}")))
}

fn row_to_post(row: &libsql::Row) -> Result<Post> {
    let tags_json: String = row.get(3).map_err(store_err)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| PostlineError::integrity(format!("invalid tags_json: {e}")))?;

    Ok(Post {
        url: row.get::<String>(0).map_err(store_err)?,
        author: row.get::<String>(1).map_err(store_err)?,
        markdown: row.get::<String>(2).ok(),
        tags,
        published_at: match row.get::<String>(4).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        created_at: parse_ts(&row.get::<String>(5).map_err(store_err)?)?,
        updated_at: parse_ts(&row.get::<String>(6).map_err(store_err)?)?,
        last_seen: parse_ts(&row.get::<String>(7).map_err(store_err)?)?,
    })
}

fn row_to_metrics(row: &libsql::Row) -> Result<Metrics> {
    Ok(Metrics {
        post_url: row.get::<String>(0).map_err(store_err)?,
        views: row.get::<i64>(1).ok().map(|v| v as u64),
        likes: row.get::<i64>(2).map_err(store_err)? as u64,
        comments: row.get::<i64>(3).map_err(store_err)? as u64,
        reposts: row.get::<i64>(4).map_err(store_err)? as u64,
        shares: row.get::<i64>(5).map_err(store_err)? as u64,
        score: row.get::<f64>(6).map_err(store_err)?,
        updated_at: parse_ts(&row.get::<String>(7).map_err(store_err)?)?,
    })
}

fn row_to_media(row: &libsql::Row) -> Result<MediaRef> {
    let type_str: String = row.get(1).map_err(store_err)?;
    let status_str: String = row.get(4).map_err(store_err)?;

    Ok(MediaRef {
        post_url: row.get::<String>(0).map_err(store_err)?,
        media_type: type_str
            .parse::<MediaType>()
            .map_err(PostlineError::integrity)?,
        original_url: row.get::<String>(2).map_err(store_err)?,
        storage_key: row.get::<String>(3).map_err(store_err)?,
        status: status_str
            .parse::<MediaStatus>()
            .map_err(PostlineError::integrity)?,
        size_bytes: row.get::<i64>(5).ok().map(|v| v as u64),
        width: row.get::<i64>(6).ok().map(|v| v as u32),
        height: row.get::<i64>(7).ok().map(|v| v as u32),
        created_at: parse_ts(&row.get::<String>(8).map_err(store_err)?)?,
        updated_at: parse_ts(&row.get::<String>(9).map_err(store_err)?)?,
    })
}

fn row_to_record(row: &libsql::Row) -> Result<ProcessingRecord> {
    let stage_str: String = row.get(2).map_err(store_err)?;
    let status_str: String = row.get(3).map_err(store_err)?;

    Ok(ProcessingRecord {
        id: row.get::<i64>(0).map_err(store_err)?,
        post_url: row.get::<String>(1).map_err(store_err)?,
        stage: stage_str.parse::<Stage>().map_err(PostlineError::integrity)?,
        status: status_str
            .parse::<StageStatus>()
            .map_err(PostlineError::integrity)?,
        attempt: row.get::<i64>(4).map_err(store_err)? as u32,
        started_at: parse_ts(&row.get::<String>(5).map_err(store_err)?)?,
        finished_at: match row.get::<String>(6).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        error: row.get::<String>(7).ok(),
    })
}

fn row_to_agent(row: &libsql::Row) -> Result<AgentDescriptor> {
    let capabilities_json: String = row.get(5).map_err(store_err)?;
    let capabilities: Vec<String> = serde_json::from_str(&capabilities_json)
        .map_err(|e| PostlineError::integrity(format!("invalid capabilities_json: {e}")))?;
    let metadata = match row.get::<String>(6).ok() {
        Some(s) => Some(
            serde_json::from_str(&s)
                .map_err(|e| PostlineError::integrity(format!("invalid metadata_json: {e}")))?,
        ),
        None => None,
    };
    let status_str: String = row.get(7).map_err(store_err)?;

    Ok(AgentDescriptor {
        name: row.get::<String>(0).map_err(store_err)?,
        description: row.get::<String>(1).map_err(store_err)?,
        version: row.get::<String>(2).map_err(store_err)?,
        base_url: row.get::<String>(3).map_err(store_err)?,
        health_url: row.get::<String>(4).map_err(store_err)?,
        capabilities,
        metadata,
        status: status_str
            .parse::<AgentStatus>()
            .map_err(PostlineError::integrity)?,
        last_seen: parse_ts(&row.get::<String>(8).map_err(store_err)?)?,
        error_count: row.get::<i64>(9).map_err(store_err)? as u32,
        registered_at: parse_ts(&row.get::<String>(10).map_err(store_err)?)?,
    })
}
