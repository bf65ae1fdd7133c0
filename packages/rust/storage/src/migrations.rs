//! SQL migration definitions for the Postline database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: posts, metrics, media, processing_log, \
                      agents, health_history, error_log, crawl_state",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Posts: URL is the immutable identity
CREATE TABLE IF NOT EXISTS posts (
    url          TEXT PRIMARY KEY,
    author       TEXT NOT NULL,
    markdown     TEXT,
    tags_json    TEXT NOT NULL DEFAULT '[]',
    published_at TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    last_seen    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author);

-- Metrics: one row per post; score is generated from the counters and can
-- never be written directly. views stays NULL until an enrichment supplies it.
CREATE TABLE IF NOT EXISTS metrics (
    post_url   TEXT PRIMARY KEY REFERENCES posts(url) ON DELETE CASCADE,
    views      INTEGER,
    likes      INTEGER NOT NULL DEFAULT 0,
    comments   INTEGER NOT NULL DEFAULT 0,
    reposts    INTEGER NOT NULL DEFAULT 0,
    shares     INTEGER NOT NULL DEFAULT 0,
    score      REAL GENERATED ALWAYS AS (
        COALESCE(views, 0) * 1.0
        + likes * 0.3
        + comments * 0.3
        + reposts * 0.1
        + shares * 0.1
    ) STORED,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_score ON metrics(score);

-- Media assets; (post_url, original_url) is the dedup identity
CREATE TABLE IF NOT EXISTS media (
    id           TEXT PRIMARY KEY,
    post_url     TEXT NOT NULL REFERENCES posts(url) ON DELETE CASCADE,
    media_type   TEXT NOT NULL,
    original_url TEXT NOT NULL,
    storage_key  TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    size_bytes   INTEGER,
    width        INTEGER,
    height       INTEGER,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE(post_url, original_url)
);

CREATE INDEX IF NOT EXISTS idx_media_post ON media(post_url);

-- Append-only processing history, one row per (post, stage) attempt
CREATE TABLE IF NOT EXISTS processing_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    post_url    TEXT NOT NULL,
    stage       TEXT NOT NULL,
    status      TEXT NOT NULL,
    attempt     INTEGER NOT NULL DEFAULT 1,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    error       TEXT
);

CREATE INDEX IF NOT EXISTS idx_processing_post ON processing_log(post_url, stage);

-- Agent registry; soft status transitions only, rows are never deleted
CREATE TABLE IF NOT EXISTS agents (
    name              TEXT PRIMARY KEY,
    description       TEXT NOT NULL DEFAULT '',
    version           TEXT NOT NULL DEFAULT '',
    base_url          TEXT NOT NULL,
    health_url        TEXT NOT NULL,
    capabilities_json TEXT NOT NULL DEFAULT '[]',
    metadata_json     TEXT,
    status            TEXT NOT NULL DEFAULT 'active',
    last_seen         TEXT NOT NULL,
    error_count       INTEGER NOT NULL DEFAULT 0,
    registered_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status, last_seen);

-- Immutable health probe history
CREATE TABLE IF NOT EXISTS health_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_name TEXT NOT NULL REFERENCES agents(name) ON DELETE CASCADE,
    status     TEXT NOT NULL,
    latency_ms INTEGER NOT NULL DEFAULT 0,
    error      TEXT,
    checked_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_health_agent ON health_history(agent_name, checked_at);

-- System error log for per-record failures that must not halt the pipeline
CREATE TABLE IF NOT EXISTS error_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    scope        TEXT NOT NULL,
    post_url     TEXT,
    message      TEXT NOT NULL,
    context_json TEXT,
    occurred_at  TEXT NOT NULL
);

-- Per-author incremental crawl checkpoints
CREATE TABLE IF NOT EXISTS crawl_state (
    author         TEXT PRIMARY KEY,
    latest_post_id TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
