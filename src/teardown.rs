//! Reverse pipeline: best-effort deletion with an explicit confirmation gate
//!
//! Teardown never stops early: every step's deletion is attempted and its
//! outcome recorded, because leaving orphaned resources is worse than an
//! incomplete log. A target that is already absent counts as success.

use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use crate::cloud::CloudControl;
use crate::config::StackConfig;
use crate::manifest::Manifest;
use crate::step::Registry;

/// The only accepted confirmation token. Case-sensitive.
pub const CONFIRM_TOKEN: &str = "DELETE";

/// Per-step teardown result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The resource was deleted by this run.
    Deleted,
    /// The resource was already absent.
    AlreadyGone,
    /// The manifest lacks the keys needed to address the resource
    /// (partially-completed provisioning run).
    Skipped,
    /// Deletion failed; the run continued regardless.
    Failed(String),
}

impl TeardownOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::AlreadyGone => "already gone",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Overall disposition of a teardown run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStatus {
    /// Confirmation token did not match; nothing was touched.
    Cancelled,
    /// Every attempted deletion succeeded (or was already done).
    FullyClean,
    /// At least one deletion failed; the account may hold orphans.
    PartiallyClean,
}

/// Per-step outcome table for the operator.
#[derive(Debug)]
pub struct TeardownReport {
    pub status: TeardownStatus,
    pub steps: Vec<(String, TeardownOutcome)>,
    pub manifest_removed: bool,
    pub credential_removed: bool,
}

impl TeardownReport {
    fn cancelled() -> Self {
        Self {
            status: TeardownStatus::Cancelled,
            steps: Vec::new(),
            manifest_removed: false,
            credential_removed: false,
        }
    }

    pub fn is_fully_clean(&self) -> bool {
        self.status == TeardownStatus::FullyClean
    }

    pub fn outcome_for(&self, step: &str) -> Option<&TeardownOutcome> {
        self.steps
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, outcome)| outcome)
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            TeardownStatus::Cancelled => return writeln!(f, "teardown cancelled"),
            TeardownStatus::FullyClean => writeln!(f, "teardown fully complete")?,
            TeardownStatus::PartiallyClean => writeln!(f, "teardown completed with errors")?,
        }
        for (name, outcome) in &self.steps {
            match outcome {
                TeardownOutcome::Failed(reason) => {
                    writeln!(f, "  {name:<16} failed: {reason}")?;
                }
                other => writeln!(f, "  {name:<16} {}", other.as_str())?,
            }
        }
        Ok(())
    }
}

/// Walks a registry in reverse against an injected control plane.
pub struct Decommissioner<'a> {
    cloud: &'a dyn CloudControl,
    config: &'a StackConfig,
}

impl<'a> Decommissioner<'a> {
    pub fn new(cloud: &'a dyn CloudControl, config: &'a StackConfig) -> Self {
        Self { cloud, config }
    }

    /// Attempt to delete everything the manifest addresses, in reverse
    /// registry order. Never raises: individual failures are recorded and
    /// the run continues. `confirmation` must equal [`CONFIRM_TOKEN`] or the
    /// run is cancelled before any destructive call is issued.
    ///
    /// After the walk, the local manifest and cached credential files are
    /// removed as well.
    pub async fn run(
        &self,
        registry: &Registry,
        manifest: &Manifest,
        confirmation: &str,
    ) -> TeardownReport {
        if confirmation != CONFIRM_TOKEN {
            info!("Confirmation token mismatch, teardown cancelled");
            return TeardownReport::cancelled();
        }

        let total = registry.len();
        let mut steps = Vec::with_capacity(total);
        let mut any_failed = false;

        for (index, step) in registry.steps().iter().rev().enumerate() {
            let ordinal = index + 1;
            let missing: Vec<&str> = step
                .teardown_requires()
                .iter()
                .copied()
                .filter(|key| !manifest.contains(key))
                .collect();
            if !missing.is_empty() {
                info!(
                    step = step.name(),
                    missing = ?missing,
                    "[{ordinal}/{total}] skipped, manifest has no record of this resource"
                );
                steps.push((step.name().to_string(), TeardownOutcome::Skipped));
                continue;
            }

            info!(step = step.name(), "[{ordinal}/{total}] deleting");
            let outcome = match step.teardown(self.cloud, self.config, manifest).await {
                Ok(()) => TeardownOutcome::Deleted,
                Err(e) if e.is_not_found() => {
                    info!(step = step.name(), "[{ordinal}/{total}] already gone");
                    TeardownOutcome::AlreadyGone
                }
                Err(e) => {
                    warn!(step = step.name(), error = ?e, "[{ordinal}/{total}] delete failed");
                    any_failed = true;
                    TeardownOutcome::Failed(e.to_string())
                }
            };
            steps.push((step.name().to_string(), outcome));
        }

        let manifest_removed = remove_local_file(&self.config.manifest_path, "manifest");
        let credential_removed = remove_local_file(&self.config.token_path, "credential");
        if !manifest_removed || !credential_removed {
            any_failed = true;
        }

        TeardownReport {
            status: if any_failed {
                TeardownStatus::PartiallyClean
            } else {
                TeardownStatus::FullyClean
            },
            steps,
            manifest_removed,
            credential_removed,
        }
    }
}

/// Remove a local file, treating "already absent" as success.
fn remove_local_file(path: &Path, what: &str) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed local {what} file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = ?e, "Failed to remove local {what} file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::LocalControlPlane;
    use crate::manifest::keys;
    use crate::provision::Provisioner;
    use crate::stack;
    use crate::testing::test_config;
    use crate::wait::PollPolicy;

    async fn provisioned() -> (LocalControlPlane, StackConfig, Manifest, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let cloud = LocalControlPlane::in_memory(&config.account_id, &config.region);
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();
        let report = Provisioner::new(&cloud, &config).run(&registry).await.unwrap();
        report.manifest.save(&config.manifest_path).unwrap();
        (cloud, config, report.manifest, dir)
    }

    #[tokio::test]
    async fn wrong_token_issues_zero_destructive_calls() {
        let (cloud, config, manifest, _dir) = provisioned().await;
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();
        let resources_before = cloud.total_resources().await;

        let report = Decommissioner::new(&cloud, &config)
            .run(&registry, &manifest, "delete")
            .await;

        assert_eq!(report.status, TeardownStatus::Cancelled);
        assert_eq!(cloud.delete_calls(), 0);
        assert_eq!(cloud.total_resources().await, resources_before);
        // The manifest survives a cancelled run.
        assert!(config.manifest_path.exists());
    }

    #[tokio::test]
    async fn full_teardown_deletes_everything_and_the_manifest() {
        let (cloud, config, manifest, _dir) = provisioned().await;
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();

        let report = Decommissioner::new(&cloud, &config)
            .run(&registry, &manifest, CONFIRM_TOKEN)
            .await;

        assert_eq!(report.status, TeardownStatus::FullyClean);
        assert_eq!(cloud.total_resources().await, 0);
        assert!(!config.manifest_path.exists());
        assert!(report
            .steps
            .iter()
            .all(|(_, outcome)| *outcome == TeardownOutcome::Deleted));
    }

    #[tokio::test]
    async fn teardown_is_idempotent_via_already_gone() {
        let (cloud, config, manifest, _dir) = provisioned().await;
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();
        let decommissioner = Decommissioner::new(&cloud, &config);

        decommissioner.run(&registry, &manifest, CONFIRM_TOKEN).await;
        let second = decommissioner.run(&registry, &manifest, CONFIRM_TOKEN).await;

        assert_eq!(second.status, TeardownStatus::FullyClean);
        assert!(second
            .steps
            .iter()
            .all(|(_, outcome)| *outcome == TeardownOutcome::AlreadyGone));
    }

    #[tokio::test]
    async fn partial_manifest_skips_unprovisioned_steps() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let cloud = LocalControlPlane::in_memory(&config.account_id, &config.region);
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();

        // Simulate a run that only got as far as the REST façade.
        let mut manifest = Manifest::new();
        manifest.insert(keys::REGION, &config.region);
        manifest.insert(keys::REST_API_ID, "abc123");

        let report = Decommissioner::new(&cloud, &config)
            .run(&registry, &manifest, CONFIRM_TOKEN)
            .await;

        // The façade was attempted (absent in this control plane, so
        // already gone); everything else was skipped, nothing raised.
        assert_eq!(
            report.outcome_for("rest-api"),
            Some(&TeardownOutcome::AlreadyGone)
        );
        assert_eq!(
            report.outcome_for("gateway-target"),
            Some(&TeardownOutcome::Skipped)
        );
        assert_eq!(report.outcome_for("gateway"), Some(&TeardownOutcome::Skipped));
        assert_eq!(report.status, TeardownStatus::FullyClean);
    }

    #[tokio::test]
    async fn rest_api_from_manifest_is_deleted_by_id() {
        let (cloud, config, manifest, _dir) = provisioned().await;
        let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();
        assert!(cloud.has_rest_api(crate::config::REST_API_NAME).await);

        let report = Decommissioner::new(&cloud, &config)
            .run(&registry, &manifest, CONFIRM_TOKEN)
            .await;

        assert_eq!(report.outcome_for("rest-api"), Some(&TeardownOutcome::Deleted));
        assert!(!cloud.has_rest_api(crate::config::REST_API_NAME).await);
    }
}
