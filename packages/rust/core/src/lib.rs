//! Pipeline coordination core for Postline.
//!
//! This crate ties the dual-tier storage layers together into the services
//! the stage processors call:
//! - [`DualWriteCoordinator`] — durable-first partial-merge upserts
//! - [`StageRouter`] — completeness routing and the vision-fill relay
//! - [`AgentHealthRegistry`] / [`HealthProber`] — stage liveness tracking
//! - [`RankingEngine`] — cached top-K posts per author
//! - [`IngestPipeline`] — batch ingest orchestration

pub mod coordinator;
pub mod pipeline;
pub mod probe;
pub mod ranking;
pub mod registry;
pub mod router;

pub use coordinator::DualWriteCoordinator;
pub use pipeline::{IngestOutcome, IngestPipeline, IngestResult, ProgressReporter, SilentProgress};
pub use probe::HealthProber;
pub use ranking::RankingEngine;
pub use registry::AgentHealthRegistry;
pub use router::{FailureDisposition, RouteOutcome, StageRouter};
