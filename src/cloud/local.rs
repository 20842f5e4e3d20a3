//! Local control-plane emulation
//!
//! An in-memory [`CloudControl`] implementation with deterministic,
//! name-derived identifiers, used by the CLI for offline demo runs and by
//! every test. State can optionally be persisted as JSON under the platform
//! data directory so `deploy` and `teardown` agree across process invocations.
//!
//! Real provider bindings implement [`CloudControl`] out of tree; this crate
//! deliberately does not reproduce any provider's resource model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    CloudControl, CloudError, Ensured, FunctionSpec, Gateway, GatewaySpec, GatewayState,
    RestApiSpec, RoleSpec, Route, TargetSpec, ToolOverride, UserPool, UserPoolSpec,
};

/// Default number of `Creating` polls a new gateway reports before `Ready`.
const DEFAULT_READINESS_POLLS: u32 = 2;

/// Where the emulated control plane persists its state by default.
pub fn default_state_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "petstore-stack")
        .context("failed to resolve project directories")?;
    let state_dir = proj_dirs.data_local_dir();
    std::fs::create_dir_all(state_dir).context("failed to create state directory")?;
    Ok(state_dir.join("control-plane.json"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleRecord {
    arn: String,
    trust_service: String,
    managed_policy_arns: Vec<String>,
    inline_policy_names: Vec<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionRecord {
    arn: String,
    runtime: String,
    handler: String,
    role_arn: String,
    payload_bytes: usize,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RestApiRecord {
    id: String,
    routes: Vec<Route>,
    stage: String,
    integration_arn: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserPoolRecord {
    pool_id: String,
    client_id: String,
    client_name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayRecord {
    id: String,
    url: String,
    role_arn: String,
    /// Remaining status polls that still report `Creating`.
    polls_until_ready: u32,
    failed: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TargetRecord {
    id: String,
    gateway_id: String,
    rest_api_id: String,
    tools: Vec<ToolOverride>,
    created_at: DateTime<Utc>,
}

/// Persisted emulation state, keyed by well-known resource name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    roles: BTreeMap<String, RoleRecord>,
    functions: BTreeMap<String, FunctionRecord>,
    rest_apis: BTreeMap<String, RestApiRecord>,
    user_pools: BTreeMap<String, UserPoolRecord>,
    gateways: BTreeMap<String, GatewayRecord>,
    targets: BTreeMap<String, TargetRecord>,
    /// Invoke permission statements, keyed `function/statement_id`.
    permissions: BTreeMap<String, String>,
}

impl State {
    fn total_resources(&self) -> usize {
        self.roles.len()
            + self.functions.len()
            + self.rest_apis.len()
            + self.user_pools.len()
            + self.gateways.len()
            + self.targets.len()
    }
}

/// In-memory control plane with deterministic identifiers.
pub struct LocalControlPlane {
    state: Mutex<State>,
    path: Option<PathBuf>,
    account_id: String,
    region: String,
    readiness_polls: u32,
    /// New gateways immediately report a terminal failure state. Test hook.
    failing_gateways: bool,
    delete_calls: AtomicU64,
}

impl LocalControlPlane {
    /// Ephemeral control plane, state discarded on drop.
    pub fn in_memory(account_id: &str, region: &str) -> Self {
        Self {
            state: Mutex::new(State::default()),
            path: None,
            account_id: account_id.to_string(),
            region: region.to_string(),
            readiness_polls: DEFAULT_READINESS_POLLS,
            failing_gateways: false,
            delete_calls: AtomicU64::new(0),
        }
    }

    /// Control plane persisted at `path` (loaded if present).
    pub fn load(path: &Path, account_id: &str, region: &str) -> Result<Self> {
        let state = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("corrupt control-plane state at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", path.display()));
            }
        };
        debug!(path = %path.display(), resources = state.total_resources(), "Control-plane state loaded");
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
            account_id: account_id.to_string(),
            region: region.to_string(),
            readiness_polls: DEFAULT_READINESS_POLLS,
            failing_gateways: false,
            delete_calls: AtomicU64::new(0),
        })
    }

    /// Number of `Creating` polls new gateways report before `Ready`.
    pub fn with_gateway_readiness(mut self, polls: u32) -> Self {
        self.readiness_polls = polls;
        self
    }

    /// Make every newly created gateway report `Failed`. Test hook for the
    /// terminal-state path of the readiness wait.
    pub fn with_failing_gateways(mut self) -> Self {
        self.failing_gateways = true;
        self
    }

    /// Count of delete operations issued, successful or not. Used to verify
    /// the teardown confirmation gate issues zero destructive calls.
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    /// Total live resources (permission statements excluded).
    pub async fn total_resources(&self) -> usize {
        self.state.lock().await.total_resources()
    }

    pub async fn has_rest_api(&self, name: &str) -> bool {
        self.state.lock().await.rest_apis.contains_key(name)
    }

    pub async fn has_gateway(&self, name: &str) -> bool {
        self.state.lock().await.gateways.contains_key(name)
    }

    fn record_delete(&self) {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn persist(&self, state: &State) -> Result<(), CloudError> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(state)
                .map_err(|e| CloudError::Other(anyhow!(e)))?;
            crate::manifest::atomic_write(path, json.as_bytes())
                .map_err(|e| CloudError::Other(anyhow!(e).context("failed to persist control-plane state")))?;
        }
        Ok(())
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, name)
    }

    fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account_id, name
        )
    }
}

/// Stable short identifier derived from a resource kind and name. Keeps
/// repeated runs addressing identical ids, which is what makes `Existing`
/// results synthesizable without a lookup.
fn derived_id(kind: &str, name: &str) -> String {
    // FNV-1a, truncated; collision space is tiny (a handful of fixed names).
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in kind.bytes().chain(name.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{:010x}", hash & 0xff_ffff_ffff)
}

#[async_trait]
impl CloudControl for LocalControlPlane {
    async fn ensure_role(&self, spec: &RoleSpec) -> Result<Ensured<String>, CloudError> {
        let mut state = self.state.lock().await;
        if state.roles.contains_key(&spec.name) {
            // Synthesized from the well-known name, not read back.
            return Ok(Ensured::Existing(self.role_arn(&spec.name)));
        }
        let arn = self.role_arn(&spec.name);
        state.roles.insert(
            spec.name.clone(),
            RoleRecord {
                arn: arn.clone(),
                trust_service: spec.trust_service.clone(),
                managed_policy_arns: spec.managed_policy_arns.clone(),
                inline_policy_names: spec
                    .inline_policies
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect(),
                created_at: Utc::now(),
            },
        );
        self.persist(&state)?;
        info!(role = %spec.name, "Role created");
        Ok(Ensured::Created(arn))
    }

    async fn ensure_function(&self, spec: &FunctionSpec) -> Result<Ensured<String>, CloudError> {
        let mut state = self.state.lock().await;
        if state.functions.contains_key(&spec.name) {
            return Ok(Ensured::Existing(self.function_arn(&spec.name)));
        }
        if !state.roles.values().any(|r| r.arn == spec.role_arn) {
            return Err(CloudError::not_found(&spec.role_arn));
        }
        let arn = self.function_arn(&spec.name);
        state.functions.insert(
            spec.name.clone(),
            FunctionRecord {
                arn: arn.clone(),
                runtime: spec.runtime.clone(),
                handler: spec.handler.clone(),
                role_arn: spec.role_arn.clone(),
                payload_bytes: spec.payload.len(),
                created_at: Utc::now(),
            },
        );
        self.persist(&state)?;
        info!(function = %spec.name, "Function created");
        Ok(Ensured::Created(arn))
    }

    async fn allow_invoke(
        &self,
        function_name: &str,
        statement_id: &str,
        source_arn: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        if !state.functions.contains_key(function_name) {
            return Err(CloudError::not_found(function_name));
        }
        let key = format!("{function_name}/{statement_id}");
        if state.permissions.contains_key(&key) {
            return Err(CloudError::already_exists(key));
        }
        state.permissions.insert(key, source_arn.to_string());
        self.persist(&state)?;
        Ok(())
    }

    async fn ensure_rest_api(&self, spec: &RestApiSpec) -> Result<Ensured<String>, CloudError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.rest_apis.get(&spec.name) {
            return Ok(Ensured::Existing(existing.id.clone()));
        }
        let id = derived_id("api", &spec.name);
        state.rest_apis.insert(
            spec.name.clone(),
            RestApiRecord {
                id: id.clone(),
                routes: spec.routes.clone(),
                stage: spec.stage.clone(),
                integration_arn: spec.integration_arn.clone(),
                created_at: Utc::now(),
            },
        );
        self.persist(&state)?;
        info!(api = %spec.name, id = %id, stage = %spec.stage, "REST API created and deployed");
        Ok(Ensured::Created(id))
    }

    async fn ensure_user_pool(&self, spec: &UserPoolSpec) -> Result<Ensured<UserPool>, CloudError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.user_pools.get(&spec.name) {
            return Ok(Ensured::Existing(UserPool {
                pool_id: existing.pool_id.clone(),
                client_id: existing.client_id.clone(),
            }));
        }
        let pool = UserPool {
            pool_id: format!("{}_{}", self.region, derived_id("pool", &spec.name)),
            client_id: derived_id("client", &spec.client_name),
        };
        state.user_pools.insert(
            spec.name.clone(),
            UserPoolRecord {
                pool_id: pool.pool_id.clone(),
                client_id: pool.client_id.clone(),
                client_name: spec.client_name.clone(),
                created_at: Utc::now(),
            },
        );
        self.persist(&state)?;
        info!(pool = %spec.name, pool_id = %pool.pool_id, "User pool created");
        Ok(Ensured::Created(pool))
    }

    async fn ensure_gateway(&self, spec: &GatewaySpec) -> Result<Ensured<Gateway>, CloudError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.gateways.get(&spec.name) {
            return Ok(Ensured::Existing(Gateway {
                id: existing.id.clone(),
                url: existing.url.clone(),
            }));
        }
        let id = derived_id("gw", &spec.name);
        let gateway = Gateway {
            id: id.clone(),
            url: format!(
                "https://{}.gateway.{}.amazonaws.com/mcp",
                id, self.region
            ),
        };
        state.gateways.insert(
            spec.name.clone(),
            GatewayRecord {
                id: gateway.id.clone(),
                url: gateway.url.clone(),
                role_arn: spec.role_arn.clone(),
                polls_until_ready: self.readiness_polls,
                failed: self.failing_gateways,
                created_at: Utc::now(),
            },
        );
        self.persist(&state)?;
        info!(gateway = %spec.name, id = %id, protocol = %spec.protocol, "Gateway created");
        Ok(Ensured::Created(gateway))
    }

    async fn gateway_status(&self, gateway_id: &str) -> Result<GatewayState, CloudError> {
        let mut state = self.state.lock().await;
        let record = state
            .gateways
            .values_mut()
            .find(|g| g.id == gateway_id)
            .ok_or_else(|| CloudError::not_found(gateway_id))?;
        if record.failed {
            return Ok(GatewayState::Failed);
        }
        if record.polls_until_ready > 0 {
            record.polls_until_ready -= 1;
            return Ok(GatewayState::Creating);
        }
        Ok(GatewayState::Ready)
    }

    async fn ensure_gateway_target(
        &self,
        spec: &TargetSpec,
    ) -> Result<Ensured<String>, CloudError> {
        let mut state = self.state.lock().await;
        let key = format!("{}/{}", spec.gateway_id, spec.name);
        if let Some(existing) = state.targets.get(&key) {
            return Ok(Ensured::Existing(existing.id.clone()));
        }
        let gateway = state
            .gateways
            .values()
            .find(|g| g.id == spec.gateway_id)
            .ok_or_else(|| CloudError::not_found(&spec.gateway_id))?;
        if gateway.failed || gateway.polls_until_ready > 0 {
            return Err(CloudError::Other(anyhow!(
                "gateway {} is not ready for target attachment",
                spec.gateway_id
            )));
        }
        let id = derived_id("target", &key);
        state.targets.insert(
            key,
            TargetRecord {
                id: id.clone(),
                gateway_id: spec.gateway_id.clone(),
                rest_api_id: spec.rest_api_id.clone(),
                tools: spec.tool_overrides.clone(),
                created_at: Utc::now(),
            },
        );
        self.persist(&state)?;
        info!(target = %spec.name, id = %id, "Gateway target created");
        Ok(Ensured::Created(id))
    }

    async fn delete_role(&self, role_name: &str) -> Result<(), CloudError> {
        self.record_delete();
        let mut state = self.state.lock().await;
        if state.roles.remove(role_name).is_none() {
            return Err(CloudError::not_found(role_name));
        }
        self.persist(&state)?;
        Ok(())
    }

    async fn delete_function(&self, function_name: &str) -> Result<(), CloudError> {
        self.record_delete();
        let mut state = self.state.lock().await;
        if state.functions.remove(function_name).is_none() {
            return Err(CloudError::not_found(function_name));
        }
        state
            .permissions
            .retain(|key, _| !key.starts_with(&format!("{function_name}/")));
        self.persist(&state)?;
        Ok(())
    }

    async fn delete_rest_api(&self, api_id: &str) -> Result<(), CloudError> {
        self.record_delete();
        let mut state = self.state.lock().await;
        let name = state
            .rest_apis
            .iter()
            .find(|(_, r)| r.id == api_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| CloudError::not_found(api_id))?;
        state.rest_apis.remove(&name);
        self.persist(&state)?;
        Ok(())
    }

    async fn delete_user_pool(&self, pool_id: &str) -> Result<(), CloudError> {
        self.record_delete();
        let mut state = self.state.lock().await;
        let name = state
            .user_pools
            .iter()
            .find(|(_, r)| r.pool_id == pool_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| CloudError::not_found(pool_id))?;
        state.user_pools.remove(&name);
        self.persist(&state)?;
        Ok(())
    }

    async fn delete_gateway(&self, gateway_id: &str) -> Result<(), CloudError> {
        self.record_delete();
        let mut state = self.state.lock().await;
        if state.targets.values().any(|t| t.gateway_id == gateway_id) {
            return Err(CloudError::Other(anyhow!(
                "gateway {gateway_id} still has attached targets"
            )));
        }
        let name = state
            .gateways
            .iter()
            .find(|(_, r)| r.id == gateway_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| CloudError::not_found(gateway_id))?;
        state.gateways.remove(&name);
        self.persist(&state)?;
        Ok(())
    }

    async fn delete_gateway_target(
        &self,
        gateway_id: &str,
        target_id: &str,
    ) -> Result<(), CloudError> {
        self.record_delete();
        let mut state = self.state.lock().await;
        let key = state
            .targets
            .iter()
            .find(|(_, r)| r.gateway_id == gateway_id && r.id == target_id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| CloudError::not_found(target_id))?;
        state.targets.remove(&key);
        self.persist(&state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane() -> LocalControlPlane {
        LocalControlPlane::in_memory("114805761158", "us-east-1").with_gateway_readiness(1)
    }

    fn role_spec() -> RoleSpec {
        RoleSpec {
            name: "PetStoreFunctionRole".into(),
            trust_service: "lambda.amazonaws.com".into(),
            description: String::new(),
            managed_policy_arns: vec![],
            inline_policies: vec![],
        }
    }

    #[tokio::test]
    async fn ensure_role_is_idempotent_with_stable_arn() {
        let plane = plane();
        let first = plane.ensure_role(&role_spec()).await.unwrap();
        let second = plane.ensure_role(&role_spec()).await.unwrap();

        assert!(!first.existed());
        assert!(second.existed());
        assert_eq!(first.into_inner(), second.into_inner());
        assert_eq!(plane.total_resources().await, 1);
    }

    #[tokio::test]
    async fn gateway_reports_creating_then_ready() {
        let plane = plane();
        plane.ensure_role(&role_spec()).await.unwrap();
        let gateway = plane
            .ensure_gateway(&GatewaySpec {
                name: "PetStoreGateway".into(),
                role_arn: "arn:aws:iam::114805761158:role/PetStoreFunctionRole".into(),
                protocol: "MCP".into(),
                allowed_clients: vec![],
                discovery_url: String::new(),
                description: String::new(),
            })
            .await
            .unwrap()
            .into_inner();

        assert_eq!(
            plane.gateway_status(&gateway.id).await.unwrap(),
            GatewayState::Creating
        );
        assert_eq!(
            plane.gateway_status(&gateway.id).await.unwrap(),
            GatewayState::Ready
        );
    }

    #[tokio::test]
    async fn duplicate_permission_statement_is_already_exists() {
        let plane = plane();
        let role_arn = plane.ensure_role(&role_spec()).await.unwrap().into_inner();
        plane
            .ensure_function(&FunctionSpec {
                name: "PetStoreFunction".into(),
                runtime: "python3.12".into(),
                handler: "lambda_function.lambda_handler".into(),
                role_arn,
                timeout_secs: 30,
                description: String::new(),
                payload: vec![1, 2, 3],
            })
            .await
            .unwrap();

        plane
            .allow_invoke("PetStoreFunction", "apigateway-invoke", "arn:aws:execute-api:*")
            .await
            .unwrap();
        let err = plane
            .allow_invoke("PetStoreFunction", "apigateway-invoke", "arn:aws:execute-api:*")
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn delete_of_absent_resource_is_not_found() {
        let plane = plane();
        let err = plane.delete_rest_api("deadbeef00").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(plane.delete_calls(), 1);
    }
}
