//! Agent health registry: liveness and capability tracking for the
//! independently-deployed stage processors.
//!
//! The registry is an explicit injected service — components receive an
//! `Arc<AgentHealthRegistry>` rather than reaching into shared global state.
//! Descriptors are never hard-deleted; health outcomes fold into soft status
//! transitions while the full probe history stays append-only.

use std::sync::Arc;

use tracing::{info, instrument};
use url::Url;

use postline_shared::{
    AgentDescriptor, AgentRegistration, AgentStatus, HealthStatus, PostlineError, ProbeOutcome,
    Result, Stage,
};
use postline_storage::Storage;

pub struct AgentHealthRegistry {
    storage: Arc<Storage>,
}

impl AgentHealthRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register or re-register a stage processor. Re-registering refreshes
    /// the declared capabilities/metadata and resets status to active; it
    /// never duplicates the descriptor.
    #[instrument(skip_all, fields(name = %registration.name))]
    pub async fn register(&self, registration: &AgentRegistration) -> Result<AgentDescriptor> {
        if registration.name.trim().is_empty() {
            return Err(PostlineError::validation("agent name is required"));
        }
        for (field, value) in [
            ("base_url", &registration.base_url),
            ("health_url", &registration.health_url),
        ] {
            Url::parse(value).map_err(|e| {
                PostlineError::validation(format!("invalid {field} {value:?}: {e}"))
            })?;
        }

        self.storage.upsert_agent(registration).await?;
        info!(capabilities = ?registration.capabilities, "agent registered");

        self.storage
            .get_agent(&registration.name)
            .await?
            .ok_or_else(|| {
                PostlineError::integrity(format!(
                    "agent vanished after registration: {}",
                    registration.name
                ))
            })
    }

    /// Append a probe outcome to the health history and fold it into the
    /// descriptor's rolling state: healthy restores `active` and lowers the
    /// error count to 0; unhealthy drives `inactive`; any other
    /// classification drives `error`. The error count only grows on
    /// non-healthy outcomes.
    #[instrument(skip_all, fields(name = %name, status = outcome.status.as_str()))]
    pub async fn record_health_check(
        &self,
        name: &str,
        outcome: &ProbeOutcome,
    ) -> Result<AgentDescriptor> {
        let agent = self
            .storage
            .get_agent(name)
            .await?
            .ok_or_else(|| PostlineError::validation(format!("unknown agent: {name}")))?;

        self.storage.insert_health_check(name, outcome).await?;

        let (status, error_count) = match outcome.status {
            HealthStatus::Healthy => (AgentStatus::Active, 0),
            HealthStatus::Unhealthy => (AgentStatus::Inactive, agent.error_count + 1),
            HealthStatus::Timeout | HealthStatus::Error => {
                (AgentStatus::Error, agent.error_count + 1)
            }
        };
        self.storage.set_agent_state(name, status, error_count).await?;

        self.storage
            .get_agent(name)
            .await?
            .ok_or_else(|| PostlineError::integrity(format!("agent vanished: {name}")))
    }

    /// Currently-active descriptors, most-recently-seen first.
    pub async fn list_active(&self) -> Result<Vec<AgentDescriptor>> {
        self.storage.list_agents_by_status(AgentStatus::Active).await
    }

    /// Every registered descriptor regardless of status, for probe sweeps.
    pub async fn all_agents(&self) -> Result<Vec<AgentDescriptor>> {
        self.storage.list_agents().await
    }

    /// Whether any active agent advertises a capability for `stage`. A stage
    /// with no active agent is temporarily unavailable — routing to it is
    /// deferred, never dropped.
    pub async fn stage_available(&self, stage: Stage) -> Result<bool> {
        Ok(self.list_active().await?.iter().any(|a| a.handles(stage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_registry() -> AgentHealthRegistry {
        let tmp = std::env::temp_dir().join(format!("pl_reg_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
        AgentHealthRegistry::new(storage)
    }

    fn registration(name: &str, capability: &str) -> AgentRegistration {
        AgentRegistration {
            name: name.into(),
            description: format!("{capability} processor"),
            version: "1.0.0".into(),
            base_url: format!("http://{name}:8080"),
            health_url: format!("http://{name}:8080/health"),
            capabilities: vec![capability.into()],
            metadata: None,
        }
    }

    fn outcome(status: HealthStatus) -> ProbeOutcome {
        ProbeOutcome {
            status,
            latency_ms: 7,
            error: None,
        }
    }

    #[tokio::test]
    async fn register_validates_inputs() {
        let registry = test_registry().await;

        let mut bad = registration("vision-agent", "vision_fill");
        bad.name = "".into();
        assert!(matches!(
            registry.register(&bad).await,
            Err(PostlineError::Validation { .. })
        ));

        let mut bad = registration("vision-agent", "vision_fill");
        bad.health_url = "not a url".into();
        assert!(matches!(
            registry.register(&bad).await,
            Err(PostlineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn reregistration_updates_in_place() {
        let registry = test_registry().await;
        registry
            .register(&registration("vision-agent", "vision_fill"))
            .await
            .unwrap();

        let mut updated = registration("vision-agent", "vision_fill");
        updated.capabilities.push("analysis".into());
        let agent = registry.register(&updated).await.unwrap();

        assert_eq!(agent.capabilities.len(), 2);
        assert_eq!(registry.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unhealthy_checks_drive_inactive_and_healthy_restores() {
        let registry = test_registry().await;
        registry
            .register(&registration("vision-agent", "vision_fill"))
            .await
            .unwrap();

        // Three consecutive unhealthy probes: inactive, error count growing.
        for expected_count in 1..=3 {
            let agent = registry
                .record_health_check("vision-agent", &outcome(HealthStatus::Unhealthy))
                .await
                .unwrap();
            assert_eq!(agent.status, AgentStatus::Inactive);
            assert_eq!(agent.error_count, expected_count);
        }
        assert!(registry.list_active().await.unwrap().is_empty());

        // A single healthy check restores active and lowers the count to 0.
        let agent = registry
            .record_health_check("vision-agent", &outcome(HealthStatus::Healthy))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.error_count, 0);
    }

    #[tokio::test]
    async fn timeout_and_error_drive_error_status() {
        let registry = test_registry().await;
        registry
            .register(&registration("vision-agent", "vision_fill"))
            .await
            .unwrap();

        let agent = registry
            .record_health_check("vision-agent", &outcome(HealthStatus::Timeout))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.error_count, 1);

        let agent = registry
            .record_health_check("vision-agent", &outcome(HealthStatus::Error))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.error_count, 2);
    }

    #[tokio::test]
    async fn health_check_for_unknown_agent_is_rejected() {
        let registry = test_registry().await;
        assert!(matches!(
            registry
                .record_health_check("ghost", &outcome(HealthStatus::Healthy))
                .await,
            Err(PostlineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn stage_availability_tracks_active_capabilities() {
        let registry = test_registry().await;
        registry
            .register(&registration("vision-agent", "vision_fill"))
            .await
            .unwrap();
        registry
            .register(&registration("md-agent", "markdown"))
            .await
            .unwrap();

        assert!(registry.stage_available(Stage::VisionFill).await.unwrap());
        assert!(registry.stage_available(Stage::Markdown).await.unwrap());
        assert!(!registry.stage_available(Stage::Analysis).await.unwrap());

        // Vision agent goes down; the stage becomes unavailable.
        registry
            .record_health_check("vision-agent", &outcome(HealthStatus::Unhealthy))
            .await
            .unwrap();
        assert!(!registry.stage_available(Stage::VisionFill).await.unwrap());
    }

    #[tokio::test]
    async fn list_active_orders_by_recency() {
        let registry = test_registry().await;
        registry
            .register(&registration("md-agent", "markdown"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry
            .register(&registration("vision-agent", "vision_fill"))
            .await
            .unwrap();

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].name, "vision-agent");
    }
}
