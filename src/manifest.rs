//! The manifest: persisted record of everything a provisioning run created
//!
//! A flat string-to-string map, serialized as stable pretty-printed JSON so
//! operators can diff successive runs. Saved atomically (temp file + rename)
//! so an interrupted save never leaves a half-written manifest behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Well-known manifest keys. Consumers (teardown, tool clients) read by fixed
/// key name, so these are part of the crate's external interface.
pub mod keys {
    pub const REGION: &str = "region";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const FUNCTION_ROLE_ARN: &str = "function_role_arn";
    pub const FUNCTION_ARN: &str = "function_arn";
    pub const FUNCTION_NAME: &str = "function_name";
    pub const REST_API_ID: &str = "rest_api_id";
    pub const REST_API_ENDPOINT: &str = "rest_api_endpoint";
    pub const GATEWAY_ROLE_ARN: &str = "gateway_role_arn";
    pub const USER_POOL_ID: &str = "user_pool_id";
    pub const CLIENT_ID: &str = "client_id";
    pub const DISCOVERY_URL: &str = "discovery_url";
    pub const GATEWAY_ID: &str = "gateway_id";
    pub const GATEWAY_URL: &str = "gateway_url";
    pub const TARGET_ID: &str = "target_id";
}

/// Errors from loading or saving a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file does not exist. This is the designed "nothing has
    /// been provisioned yet" signal, not a crash condition.
    #[error("no manifest at {path}")]
    NotFound { path: String },

    #[error("failed to read or write manifest at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest at {path} is not valid JSON")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value record of a provisioning run.
///
/// Created empty at provisioning start, populated incrementally as steps
/// succeed, persisted once at the end, consumed read-only by teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    values: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Fetch a key that teardown or a tool client cannot proceed without.
    pub fn require(&self, key: &str) -> anyhow::Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("manifest is missing required key `{key}`"))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in stable (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load a manifest from disk.
    ///
    /// Returns [`ManifestError::NotFound`] when the file is absent; teardown
    /// treats that as a clean no-op, tool clients as a failed precondition.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let display = path.display().to_string();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound { path: display });
            }
            Err(e) => return Err(ManifestError::Io { path: display, source: e }),
        };
        serde_json::from_str(&raw).map_err(|e| ManifestError::Parse { path: display, source: e })
    }

    /// Persist the manifest with atomic write-replace.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let display_path = path.display().to_string();
        let json = serde_json::to_string_pretty(&self.values)
            .expect("string map serialization is infallible");
        atomic_write(path, json.as_bytes())
            .map_err(|e| ManifestError::Io { path: display_path.clone(), source: e })?;
        debug!(path = %display_path, entries = self.values.len(), "Manifest saved");
        Ok(())
    }

    /// Remove the manifest file. An already-absent file is fine.
    pub fn delete(path: &Path) -> Result<(), ManifestError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ManifestError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

/// Write `bytes` to `path` via a temp file in the same directory plus rename,
/// so readers never observe a partially written file.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(bytes)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
