//! Application configuration for Postline.
//!
//! User config lives at `~/.postline/postline.toml`.
//! Deployment overrides come from the config file; everything has a default
//! so a missing file yields a working local setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PostlineError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "postline.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".postline";

// ---------------------------------------------------------------------------
// Config structs (matching postline.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Cache TTL settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Stage router settings.
    #[serde(default)]
    pub router: RouterSettings,

    /// Ranking engine settings.
    #[serde(default)]
    pub ranking: RankingSettings,

    /// Agent health probing settings.
    #[serde(default)]
    pub health: HealthSettings,

    /// Retry/backoff policy for durable-store operations.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Ingest pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.postline/postline.db".into()
}

/// `[cache]` section. TTLs are chosen so the cache self-heals without manual
/// invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for `metrics:{url}` entries, in seconds (default 30 days).
    #[serde(default = "default_metrics_ttl")]
    pub metrics_ttl_secs: u64,

    /// TTL for `ranking:{author}` snapshots, in seconds (default 10 minutes).
    #[serde(default = "default_ranking_ttl")]
    pub ranking_ttl_secs: u64,

    /// TTL for `task:{id}` progress entries, in seconds (default 1 hour).
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metrics_ttl_secs: default_metrics_ttl(),
            ranking_ttl_secs: default_ranking_ttl(),
            task_ttl_secs: default_task_ttl(),
        }
    }
}

fn default_metrics_ttl() -> u64 {
    30 * 24 * 60 * 60
}
fn default_ranking_ttl() -> u64 {
    600
}
fn default_task_ttl() -> u64 {
    3600
}

/// `[router]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Maximum URLs accepted per routing batch.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Bound on re-enqueue attempts before a stage failure is terminal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_batch() -> usize {
    50
}
fn default_max_attempts() -> u32 {
    3
}

/// `[ranking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSettings {
    /// Hard cap on `k` for top-post queries.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_max_top_k() -> usize {
    30
}

/// `[health]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Per-probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    5
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retry attempts after the first failure of a transient store error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in ms, doubled per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-operation timeout in seconds for store and cache calls.
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            op_timeout_secs: default_op_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_op_timeout() -> u64 {
    10
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Simultaneous in-flight posts during batch ingest.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Runtime configs (merged views handed to components)
// ---------------------------------------------------------------------------

/// Retry policy handed to the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub op_timeout: Duration,
}

impl From<&AppConfig> for RetryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            backoff_base: Duration::from_millis(config.retry.backoff_base_ms),
            op_timeout: Duration::from_secs(config.retry.op_timeout_secs),
        }
    }
}

/// Cache TTLs handed to the coordinator and ranking engine.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub metrics: Duration,
    pub ranking: Duration,
    pub task: Duration,
}

impl From<&AppConfig> for CacheTtls {
    fn from(config: &AppConfig) -> Self {
        Self {
            metrics: Duration::from_secs(config.cache.metrics_ttl_secs),
            ranking: Duration::from_secs(config.cache.ranking_ttl_secs),
            task: Duration::from_secs(config.cache.task_ttl_secs),
        }
    }
}

/// Router limits.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub max_batch: usize,
    pub max_attempts: u32,
}

impl From<&AppConfig> for RouterConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_batch: config.router.max_batch,
            max_attempts: config.router.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.postline/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PostlineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.postline/postline.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PostlineError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PostlineError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PostlineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PostlineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PostlineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("metrics_ttl_secs"));
        assert!(toml_str.contains("max_top_k"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.router.max_batch, 50);
        assert_eq!(parsed.ranking.max_top_k, 30);
        assert_eq!(parsed.cache.metrics_ttl_secs, 30 * 24 * 60 * 60);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[router]
max_batch = 10

[retry]
max_retries = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.router.max_batch, 10);
        assert_eq!(config.router.max_attempts, 3);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base_ms, 200);
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let app = AppConfig::default();
        let retry = RetryConfig::from(&app);
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.backoff_base, Duration::from_millis(200));

        let ttls = CacheTtls::from(&app);
        assert_eq!(ttls.ranking, Duration::from_secs(600));
        assert_eq!(ttls.task, Duration::from_secs(3600));

        let router = RouterConfig::from(&app);
        assert_eq!(router.max_batch, 50);
        assert_eq!(router.max_attempts, 3);
    }
}
