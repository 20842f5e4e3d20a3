//! Step registry and per-step outcome types
//!
//! A stack is declared as an ordered list of steps. Ordering is a total order
//! matching resource dependency: the registry rejects, at construction time,
//! any step whose required manifest keys are not produced by an earlier step
//! (or seeded from configuration).

use async_trait::async_trait;
use thiserror::Error;

use crate::cloud::{CloudControl, CloudError};
use crate::config::StackConfig;
use crate::manifest::Manifest;

/// Manifest entries produced by one step.
pub type Outputs = Vec<(&'static str, String)>;

/// Outcome of a step's create-action. Hard failures travel on the `Err`
/// channel of [`StackStep::provision`]; this enum only carries the two
/// success shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The resource was created by this run.
    Created(Outputs),
    /// The resource already existed; identifiers were synthesized from its
    /// well-known name.
    AlreadyExists(Outputs),
}

impl StepOutcome {
    pub fn outputs(&self) -> &Outputs {
        match self {
            StepOutcome::Created(outputs) | StepOutcome::AlreadyExists(outputs) => outputs,
        }
    }

    pub fn into_outputs(self) -> Outputs {
        match self {
            StepOutcome::Created(outputs) | StepOutcome::AlreadyExists(outputs) => outputs,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Created(_) => "created",
            StepOutcome::AlreadyExists(_) => "already exists",
        }
    }
}

/// One unit of provisioning/teardown work, idempotent with respect to
/// "already exists" (forward) and "not found" (reverse).
#[async_trait]
pub trait StackStep: Send + Sync {
    /// Unique human-readable identifier.
    fn name(&self) -> &'static str;

    /// Manifest keys this step reads. Must be produced by earlier steps or
    /// seeded from configuration.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    /// Manifest keys this step produces on success.
    fn provides(&self) -> &'static [&'static str];

    /// Manifest keys teardown needs to address the resource. Defaults to
    /// [`StackStep::provides`]; steps whose deletion also addresses a parent
    /// resource override this.
    fn teardown_requires(&self) -> &'static [&'static str] {
        self.provides()
    }

    /// Create the resource. `AlreadyExists` classification happens here, not
    /// in the pipeline, so the pipeline stays decoupled from any provider's
    /// error taxonomy.
    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome>;

    /// Delete the resource addressed by the manifest. Returning
    /// [`CloudError::NotFound`] counts as success for the decommissioner.
    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        manifest: &Manifest,
    ) -> Result<(), CloudError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate step name `{0}` in registry")]
    DuplicateName(String),

    #[error("step `{step}` requires manifest key `{key}`, which no earlier step provides")]
    UnsatisfiedRequirement { step: String, key: String },
}

/// Ordered, validated list of steps. Static per pipeline: defined once, then
/// walked forward by the provisioner and in reverse by the decommissioner.
pub struct Registry {
    steps: Vec<Box<dyn StackStep>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    /// Validate uniqueness and dependency order. `seeded_keys` are manifest
    /// keys present before any step runs (fixed external configuration).
    pub fn new(
        steps: Vec<Box<dyn StackStep>>,
        seeded_keys: &[&str],
    ) -> Result<Self, RegistryError> {
        let mut produced: Vec<&str> = seeded_keys.to_vec();
        let mut names: Vec<&str> = Vec::with_capacity(steps.len());

        for step in &steps {
            if names.contains(&step.name()) {
                return Err(RegistryError::DuplicateName(step.name().to_string()));
            }
            names.push(step.name());

            for key in step.requires() {
                if !produced.contains(key) {
                    return Err(RegistryError::UnsatisfiedRequirement {
                        step: step.name().to_string(),
                        key: (*key).to_string(),
                    });
                }
            }
            produced.extend(step.provides());
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Box<dyn StackStep>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyStep {
        name: &'static str,
        requires: &'static [&'static str],
        provides: &'static [&'static str],
    }

    #[async_trait]
    impl StackStep for DummyStep {
        fn name(&self) -> &'static str {
            self.name
        }

        fn requires(&self) -> &'static [&'static str] {
            self.requires
        }

        fn provides(&self) -> &'static [&'static str] {
            self.provides
        }

        async fn provision(
            &self,
            _cloud: &dyn CloudControl,
            _config: &StackConfig,
            _manifest: &Manifest,
        ) -> anyhow::Result<StepOutcome> {
            Ok(StepOutcome::Created(vec![]))
        }

        async fn teardown(
            &self,
            _cloud: &dyn CloudControl,
            _config: &StackConfig,
            _manifest: &Manifest,
        ) -> Result<(), CloudError> {
            Ok(())
        }
    }

    fn step(
        name: &'static str,
        requires: &'static [&'static str],
        provides: &'static [&'static str],
    ) -> Box<dyn StackStep> {
        Box::new(DummyStep {
            name,
            requires,
            provides,
        })
    }

    #[test]
    fn accepts_dependency_ordered_steps() {
        let registry = Registry::new(
            vec![
                step("role", &[], &["role_arn"]),
                step("function", &["role_arn"], &["function_arn"]),
            ],
            &["region"],
        );
        assert!(registry.is_ok());
    }

    #[test]
    fn rejects_out_of_order_requirement() {
        let err = Registry::new(
            vec![
                step("function", &["role_arn"], &["function_arn"]),
                step("role", &[], &["role_arn"]),
            ],
            &[],
        )
        .unwrap_err();

        match err {
            RegistryError::UnsatisfiedRequirement { step, key } => {
                assert_eq!(step, "function");
                assert_eq!(key, "role_arn");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Registry::new(
            vec![step("role", &[], &["a"]), step("role", &[], &["b"])],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "role"));
    }

    #[test]
    fn seeded_keys_satisfy_requirements() {
        let registry = Registry::new(
            vec![step("function", &["region"], &["function_arn"])],
            &["region"],
        );
        assert!(registry.is_ok());
    }
}
