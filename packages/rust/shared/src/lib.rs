//! Shared types, error model, and configuration for Postline.
//!
//! This crate is the foundation depended on by all other Postline crates.
//! It provides:
//! - [`PostlineError`] — the unified error type
//! - Domain types ([`Post`], [`Metrics`], [`MediaRef`], [`AgentDescriptor`], ...)
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, CacheTtls, HealthSettings, PipelineSettings, RankingSettings,
    RetryConfig, RetrySettings, RouterConfig, RouterSettings, StoreConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PostlineError, Result};
pub use types::{
    AgentDescriptor, AgentRegistration, AgentStatus, HealthStatus, MediaRef, MediaStatus,
    MediaType, Metrics, MetricsUpdate, Post, PostUpdate, ProbeOutcome, ProcessingRecord,
    RankedPost, Stage, StageStatus, TaskProgress, W_COMMENTS, W_LIKES, W_REPOSTS, W_SHARES,
    W_VIEWS, score,
};
