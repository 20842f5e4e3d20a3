//! Forward pipeline: walk the registry, create resources, build the manifest
//!
//! Strictly sequential — each step's input may be the previous step's output.
//! "Already exists" is success; any other failure halts the run, since later
//! steps depend on the failed step's outputs.

use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::cloud::CloudControl;
use crate::config::StackConfig;
use crate::manifest::{keys, Manifest};
use crate::step::{Registry, StepOutcome};

/// A step failed hard; the pipeline stopped here and later steps were not
/// attempted.
#[derive(Debug, Error)]
#[error("step [{ordinal}/{total}] `{step}` failed")]
pub struct ProvisionError {
    pub step: String,
    pub ordinal: usize,
    pub total: usize,
    #[source]
    pub source: anyhow::Error,
}

/// How a completed step classified itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Created,
    AlreadyExists,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyExists => "already exists",
        }
    }
}

/// Result of a full provisioning run: the manifest plus the per-step
/// classification, in execution order.
#[derive(Debug)]
pub struct ProvisionReport {
    pub manifest: Manifest,
    pub outcomes: Vec<(String, OutcomeKind)>,
}

impl ProvisionReport {
    /// True when every step created its resource fresh (first run against a
    /// clean account).
    pub fn all_created(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, kind)| *kind == OutcomeKind::Created)
    }

    /// True when every step found its resource in place (re-run).
    pub fn all_already_existed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, kind)| *kind == OutcomeKind::AlreadyExists)
    }
}

/// Walks a registry forward against an injected control plane.
pub struct Provisioner<'a> {
    cloud: &'a dyn CloudControl,
    config: &'a StackConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(cloud: &'a dyn CloudControl, config: &'a StackConfig) -> Self {
        Self { cloud, config }
    }

    /// Execute every step in order. The manifest is seeded with the fixed
    /// external configuration, grows as steps succeed, and is returned for
    /// the caller to persist; on hard failure nothing is persisted.
    pub async fn run(&self, registry: &Registry) -> Result<ProvisionReport, ProvisionError> {
        let run_id = Uuid::new_v4();
        let total = registry.len();
        info!(%run_id, steps = total, region = %self.config.region, "Starting provisioning run");

        let mut manifest = Manifest::new();
        manifest.insert(keys::REGION, &self.config.region);
        manifest.insert(keys::ACCOUNT_ID, &self.config.account_id);

        let mut outcomes = Vec::with_capacity(total);
        for (index, step) in registry.steps().iter().enumerate() {
            let ordinal = index + 1;
            info!(step = step.name(), "[{ordinal}/{total}] provisioning");

            match step.provision(self.cloud, self.config, &manifest).await {
                Ok(outcome) => {
                    info!(
                        step = step.name(),
                        outcome = outcome.label(),
                        "[{ordinal}/{total}] done"
                    );
                    let kind = match &outcome {
                        StepOutcome::Created(_) => OutcomeKind::Created,
                        StepOutcome::AlreadyExists(_) => OutcomeKind::AlreadyExists,
                    };
                    outcomes.push((step.name().to_string(), kind));
                    for (key, value) in outcome.into_outputs() {
                        manifest.insert(key, value);
                    }
                }
                Err(source) => {
                    error!(
                        step = step.name(),
                        error = ?source,
                        "[{ordinal}/{total}] failed, aborting remaining steps"
                    );
                    return Err(ProvisionError {
                        step: step.name().to_string(),
                        ordinal,
                        total,
                        source,
                    });
                }
            }
        }

        info!(%run_id, entries = manifest.len(), "Provisioning complete");
        Ok(ProvisionReport { manifest, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::LocalControlPlane;
    use crate::stack;
    use crate::wait::PollPolicy;

    fn config() -> StackConfig {
        StackConfig::new("114805761158", "us-east-1")
    }

    #[tokio::test]
    async fn first_run_creates_everything() {
        let cloud = LocalControlPlane::in_memory("114805761158", "us-east-1");
        let config = config();
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();

        let report = Provisioner::new(&cloud, &config).run(&registry).await.unwrap();

        assert!(report.all_created());
        assert_eq!(report.outcomes.len(), 7);
        for key in [
            keys::REGION,
            keys::FUNCTION_ROLE_ARN,
            keys::FUNCTION_ARN,
            keys::REST_API_ID,
            keys::REST_API_ENDPOINT,
            keys::GATEWAY_ROLE_ARN,
            keys::USER_POOL_ID,
            keys::CLIENT_ID,
            keys::DISCOVERY_URL,
            keys::GATEWAY_ID,
            keys::GATEWAY_URL,
            keys::TARGET_ID,
        ] {
            assert!(report.manifest.contains(key), "missing key `{key}`");
        }
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let cloud = LocalControlPlane::in_memory("114805761158", "us-east-1");
        let config = config();
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();
        let provisioner = Provisioner::new(&cloud, &config);

        let first = provisioner.run(&registry).await.unwrap();
        let resources_after_first = cloud.total_resources().await;
        let second = provisioner.run(&registry).await.unwrap();

        assert!(second.all_already_existed());
        assert_eq!(first.manifest, second.manifest);
        assert_eq!(cloud.total_resources().await, resources_after_first);
    }

    #[tokio::test]
    async fn gateway_terminal_failure_halts_with_step_context() {
        let cloud =
            LocalControlPlane::in_memory("114805761158", "us-east-1").with_failing_gateways();
        let config = config();
        let registry = stack::registry_with_poll(PollPolicy::immediate(5)).unwrap();

        let err = Provisioner::new(&cloud, &config)
            .run(&registry)
            .await
            .unwrap_err();

        assert_eq!(err.step, "gateway");
        assert_eq!(err.ordinal, 6);
        assert!(format!("{:#}", anyhow::Error::from(err)).contains("terminal failure"));
    }

    #[tokio::test]
    async fn readiness_timeout_is_a_distinct_failure() {
        // Gateway needs more polls than the policy allows.
        let cloud = LocalControlPlane::in_memory("114805761158", "us-east-1")
            .with_gateway_readiness(10);
        let config = config();
        let registry = stack::registry_with_poll(PollPolicy::immediate(3)).unwrap();

        let err = Provisioner::new(&cloud, &config)
            .run(&registry)
            .await
            .unwrap_err();

        assert_eq!(err.step, "gateway");
        assert!(format!("{:#}", anyhow::Error::from(err)).contains("timed out"));
    }
}
