//! HTTP health prober for registered stage processors.
//!
//! Each probe is a GET against the agent's declared health URL under an
//! explicit deadline. Classification follows the probe taxonomy: 2xx is
//! healthy, any other status is unhealthy, a blown deadline is a timeout, a
//! transport failure is an error. Outcomes feed the registry's rolling state.

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, instrument};

use postline_shared::{AgentDescriptor, HealthStatus, PostlineError, ProbeOutcome, Result};

use crate::registry::AgentHealthRegistry;

/// User-Agent string for probe requests.
const USER_AGENT: &str = concat!("Postline/", env!("CARGO_PKG_VERSION"));

pub struct HealthProber {
    client: Client,
    timeout: Duration,
}

impl HealthProber {
    /// Create a prober with the given per-probe deadline.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PostlineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    /// Probe one agent's health endpoint and classify the outcome. Probing
    /// never fails: every failure mode maps to a classification.
    #[instrument(skip_all, fields(name = %agent.name))]
    pub async fn probe(&self, agent: &AgentDescriptor) -> ProbeOutcome {
        let start = Instant::now();
        let request = self.client.get(&agent.health_url).send();

        let outcome = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => ProbeOutcome {
                status: HealthStatus::Timeout,
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(format!("no response within {:?}", self.timeout)),
            },
            Ok(Err(e)) => ProbeOutcome {
                status: HealthStatus::Error,
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
            Ok(Ok(response)) => {
                let status = response.status();
                ProbeOutcome {
                    status: if status.is_success() {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Unhealthy
                    },
                    latency_ms: start.elapsed().as_millis() as u64,
                    error: (!status.is_success()).then(|| format!("HTTP {status}")),
                }
            }
        };

        debug!(
            status = outcome.status.as_str(),
            latency_ms = outcome.latency_ms,
            "probe finished"
        );
        outcome
    }

    /// Probe every registered agent — inactive ones included, so they can
    /// recover — and record each outcome in the registry. Returns the
    /// `(name, outcome)` pairs.
    pub async fn probe_all(
        &self,
        registry: &AgentHealthRegistry,
    ) -> Result<Vec<(String, ProbeOutcome)>> {
        let agents = registry.all_agents().await?;
        let mut outcomes = Vec::with_capacity(agents.len());

        for agent in agents {
            let outcome = self.probe(&agent).await;
            registry.record_health_check(&agent.name, &outcome).await?;
            outcomes.push((agent.name, outcome));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use postline_shared::{AgentRegistration, AgentStatus};
    use postline_storage::Storage;
    use std::sync::Arc;
    use uuid::Uuid;

    fn descriptor(health_url: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: "vision-agent".into(),
            description: String::new(),
            version: "1.0.0".into(),
            base_url: health_url.trim_end_matches("/health").to_string(),
            health_url: health_url.into(),
            capabilities: vec!["vision_fill".into()],
            metadata: None,
            status: AgentStatus::Active,
            last_seen: Utc::now(),
            error_count: 0,
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn success_response_is_healthy() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/health"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let prober = HealthProber::new(Duration::from_secs(2)).unwrap();
        let outcome = prober.probe(&descriptor(&format!("{}/health", server.uri()))).await;

        assert_eq!(outcome.status, HealthStatus::Healthy);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn failure_status_is_unhealthy() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/health"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let prober = HealthProber::new(Duration::from_secs(2)).unwrap();
        let outcome = prober.probe(&descriptor(&format!("{}/health", server.uri()))).await;

        assert_eq!(outcome.status, HealthStatus::Unhealthy);
        assert!(outcome.error.as_deref().unwrap_or("").contains("503"));
    }

    #[tokio::test]
    async fn blown_deadline_is_timeout() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/health"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let prober = HealthProber::new(Duration::from_millis(50)).unwrap();
        let outcome = prober.probe(&descriptor(&format!("{}/health", server.uri()))).await;

        assert_eq!(outcome.status, HealthStatus::Timeout);
    }

    #[tokio::test]
    async fn transport_failure_is_error() {
        // Nothing listens on this port.
        let prober = HealthProber::new(Duration::from_secs(2)).unwrap();
        let outcome = prober
            .probe(&descriptor("http://127.0.0.1:1/health"))
            .await;

        assert_eq!(outcome.status, HealthStatus::Error);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn probe_all_folds_into_registry() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/health"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let tmp = std::env::temp_dir().join(format!("pl_probe_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        let registry = AgentHealthRegistry::new(storage);
        registry
            .register(&AgentRegistration {
                name: "vision-agent".into(),
                description: String::new(),
                version: "1.0.0".into(),
                base_url: server.uri(),
                health_url: format!("{}/health", server.uri()),
                capabilities: vec!["vision_fill".into()],
                metadata: None,
            })
            .await
            .unwrap();

        let prober = HealthProber::new(Duration::from_secs(2)).unwrap();
        let outcomes = prober.probe_all(&registry).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1.status, HealthStatus::Healthy);

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].error_count, 0);
    }
}
