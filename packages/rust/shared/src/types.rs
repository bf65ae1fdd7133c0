//! Core domain types for the Postline pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed score weights. The score is a pure function of the counters and is
/// never stored or accepted independently of them.
pub const W_VIEWS: f64 = 1.0;
pub const W_LIKES: f64 = 0.3;
pub const W_COMMENTS: f64 = 0.3;
pub const W_REPOSTS: f64 = 0.1;
pub const W_SHARES: f64 = 0.1;

/// Compute the engagement score from raw counters. Missing `views` count as
/// zero; the completeness check belongs to the router, not the score.
pub fn score(views: Option<u64>, likes: u64, comments: u64, reposts: u64, shares: u64) -> f64 {
    views.unwrap_or(0) as f64 * W_VIEWS
        + likes as f64 * W_LIKES
        + comments as f64 * W_COMMENTS
        + reposts as f64 * W_REPOSTS
        + shares as f64 * W_SHARES
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// A stored post. The URL is the immutable identity; everything else is
/// enriched incrementally by independent stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Globally unique post URL.
    pub url: String,
    /// Author handle.
    pub author: String,
    /// Extracted markdown body (absent until the markdown stage completes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    /// Tag list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Upstream publish timestamp, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// When the post row was first created.
    pub created_at: DateTime<Utc>,
    /// When any field last changed.
    pub updated_at: DateTime<Utc>,
    /// Advances monotonically on every touch, including no-op upserts.
    pub last_seen: DateTime<Utc>,
}

/// Enrichment output consumed from the crawler/markdown/vision stages.
/// Absent fields leave stored values untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostUpdate {
    /// Post URL (required; the only mandatory field).
    pub url: String,
    /// Author handle (required on first sight of a URL).
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Optional counter deltas carried alongside the content update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsUpdate>,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Stored metrics for a post, one-to-one with [`Post`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Owning post URL.
    pub post_url: String,
    /// Views is nullable: its absence marks an incomplete record awaiting
    /// vision fill.
    pub views: Option<u64>,
    pub likes: u64,
    pub comments: u64,
    pub reposts: u64,
    pub shares: u64,
    /// Weighted engagement score, generated by the store from the counters.
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// A partial counter update. `None` fields keep their stored values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reposts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
}

impl MetricsUpdate {
    /// True when no counter is supplied at all.
    pub fn is_empty(&self) -> bool {
        self.views.is_none()
            && self.likes.is_none()
            && self.comments.is_none()
            && self.reposts.is_none()
            && self.shares.is_none()
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Media asset type, classified from the original URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// Blob processing lifecycle: pending → uploaded → analyzed, or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Pending,
    Uploaded,
    Analyzed,
    Failed,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MediaStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploaded" => Ok(Self::Uploaded),
            "analyzed" => Ok(Self::Analyzed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown media status: {other}")),
        }
    }
}

/// A media asset attached to a post. `(post_url, original_url)` is unique —
/// re-discovering the same asset merges rather than duplicating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub post_url: String,
    pub media_type: MediaType,
    pub original_url: String,
    /// Key in the blob store (derived from the original URL).
    pub storage_key: String,
    pub status: MediaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Processing records
// ---------------------------------------------------------------------------

/// Pipeline stages that append processing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Markdown,
    VisionFill,
    Analysis,
    MediaDownload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::VisionFill => "vision_fill",
            Self::Analysis => "analysis",
            Self::MediaDownload => "media_download",
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(Self::Markdown),
            "vision_fill" => Ok(Self::VisionFill),
            "analysis" => Ok(Self::Analysis),
            "media_download" => Ok(Self::MediaDownload),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single (post, stage) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

/// Append-only log entry for one (post, stage) attempt. Never mutated after
/// completion; retries append new attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Row id assigned by the store.
    pub id: i64,
    pub post_url: String,
    pub stage: Stage,
    pub status: StageStatus,
    /// 1-based attempt counter per (post, stage).
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Derived liveness status of a stage processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Registration payload consumed from each stage processor. Skill and
/// resource descriptors are retained verbatim as metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub base_url: String,
    pub health_url: String,
    /// Capability flags; a stage name appearing here makes the agent a
    /// candidate processor for that stage.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Skill descriptors, resource requirements, and anything else the agent
    /// declares — stored as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One registered stage processor with its rolling health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub base_url: String,
    pub health_url: String,
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
    /// Consecutive non-healthy outcomes; lowered to 0 by a healthy check.
    pub error_count: u32,
    pub registered_at: DateTime<Utc>,
}

impl AgentDescriptor {
    /// Whether this agent advertises a capability for the given stage.
    pub fn handles(&self, stage: Stage) -> bool {
        self.capabilities.iter().any(|c| c == stage.as_str())
    }
}

// ---------------------------------------------------------------------------
// Health probes
// ---------------------------------------------------------------------------

/// Probe classification as consumed from a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Timeout,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            "timeout" => Ok(Self::Timeout),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

/// Outcome of one health probe against an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Task progress & ranking
// ---------------------------------------------------------------------------

/// Progress of a batch ingest task, mirrored into the cache under `task:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    /// "running", "completed", or "failed".
    pub status: String,
    /// Fraction in `[0.0, 1.0]`.
    pub progress: f32,
    pub message: String,
}

/// One ranked entry returned by the ranking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPost {
    pub url: String,
    pub score: f64,
    /// 1-based position within the result.
    pub rank: u32,
}
