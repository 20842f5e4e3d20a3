//! Control-plane error taxonomy
//!
//! The pipeline classifies outcomes on these variants instead of any single
//! provider's exception types. `AlreadyExists` and `NotFound` are recovered
//! locally by the steps that observe them; `Other` is fatal during creation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    /// The named resource (or permission statement) already exists.
    /// Creation steps treat this as success.
    #[error("resource already exists: {name}")]
    AlreadyExists { name: String },

    /// The addressed resource does not exist.
    /// Teardown steps treat this as success.
    #[error("resource not found: {name}")]
    NotFound { name: String },

    /// Anything the pipeline cannot recover from locally.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CloudError {
    pub fn not_found(name: impl Into<String>) -> Self {
        CloudError::NotFound { name: name.into() }
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        CloudError::AlreadyExists { name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists { .. })
    }
}
