//! Shared test fixtures
//!
//! Used by unit tests and the lifecycle integration test. Not gated behind
//! `cfg(test)` so `tests/` can reach it.

use std::path::Path;

use crate::config::StackConfig;

/// Account id used throughout the test suite.
pub const TEST_ACCOUNT_ID: &str = "114805761158";

/// Region used throughout the test suite.
pub const TEST_REGION: &str = "us-east-1";

/// Config whose local files (manifest, cached token) live under `dir`, so a
/// test never touches the working directory.
pub fn test_config(dir: &Path) -> StackConfig {
    let mut config = StackConfig::new(TEST_ACCOUNT_ID, TEST_REGION);
    config.manifest_path = dir.join("deployment-manifest.json");
    config.token_path = dir.join("access-token.txt");
    config
}
