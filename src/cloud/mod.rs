//! Capability handle for control-plane operations
//!
//! The pipeline never talks to a provider SDK directly: every step receives a
//! `&dyn CloudControl` and works in terms of the operations below. `ensure_*`
//! operations are idempotent — when the named resource already exists they
//! return [`Ensured::Existing`] carrying identifiers synthesized from the
//! well-known resource name, without re-creating anything.

pub mod error;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::CloudError;
pub use local::LocalControlPlane;

/// Outcome of an `ensure_*` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured<T> {
    /// The resource was created by this call.
    Created(T),
    /// The resource already existed; identifiers are synthesized, not queried.
    Existing(T),
}

impl<T> Ensured<T> {
    pub fn into_inner(self) -> T {
        match self {
            Ensured::Created(v) | Ensured::Existing(v) => v,
        }
    }

    pub fn existed(&self) -> bool {
        matches!(self, Ensured::Existing(_))
    }
}

/// A service role: trust relationship plus attached and inline policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    /// Service principal allowed to assume the role.
    pub trust_service: String,
    pub description: String,
    pub managed_policy_arns: Vec<String>,
    /// Inline policy documents, by policy name.
    pub inline_policies: Vec<(String, serde_json::Value)>,
}

/// A serverless backend function deployed from an inline source payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub role_arn: String,
    pub timeout_secs: u32,
    pub description: String,
    /// Opaque deployable archive produced by the packager collaborator.
    pub payload: Vec<u8>,
}

/// One route of the REST façade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub method: String,
}

/// The REST façade: routes proxied to the backend function, deployed to a
/// fixed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiSpec {
    pub name: String,
    pub description: String,
    pub routes: Vec<Route>,
    /// Backend function every route proxies to.
    pub integration_arn: String,
    pub stage: String,
}

/// Password rules for the identity pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: u8,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_symbols: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_symbols: true,
        }
    }
}

/// Identity pool plus its app client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPoolSpec {
    pub name: String,
    pub client_name: String,
    pub password_policy: PasswordPolicy,
    pub auto_verified_attributes: Vec<String>,
}

/// Identifiers of a provisioned identity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPool {
    pub pool_id: String,
    pub client_id: String,
}

/// The protocol gateway fronting the REST façade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySpec {
    pub name: String,
    pub role_arn: String,
    /// Wire protocol the gateway speaks (the demo stack uses MCP).
    pub protocol: String,
    pub allowed_clients: Vec<String>,
    pub discovery_url: String,
    pub description: String,
}

/// Identifiers of a provisioned gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: String,
    pub url: String,
}

/// Lifecycle state of an asynchronously provisioned gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayState {
    Creating,
    Ready,
    Failed,
}

impl GatewayState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }
}

/// Rename and description applied to one tool exposed by a gateway target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    pub name: String,
    pub path: String,
    pub method: String,
    pub description: String,
}

/// A gateway target binding a deployed REST façade's routes as tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub gateway_id: String,
    pub rest_api_id: String,
    pub stage: String,
    pub tool_overrides: Vec<ToolOverride>,
}

/// Control-plane operations the demo stack needs.
///
/// Injected into the provisioner and decommissioner at construction so tests
/// (and offline demos) can substitute [`LocalControlPlane`]. Delete operations
/// return [`CloudError::NotFound`] for an absent target; callers decide
/// whether that is a failure (it is not, during teardown).
#[async_trait]
pub trait CloudControl: Send + Sync {
    /// Create a role, attach its policies, and return its ARN.
    async fn ensure_role(&self, spec: &RoleSpec) -> Result<Ensured<String>, CloudError>;

    /// Create the backend function and return its ARN.
    async fn ensure_function(&self, spec: &FunctionSpec) -> Result<Ensured<String>, CloudError>;

    /// Grant a service principal permission to invoke the function.
    /// A duplicate statement id is reported as [`CloudError::AlreadyExists`].
    async fn allow_invoke(
        &self,
        function_name: &str,
        statement_id: &str,
        source_arn: &str,
    ) -> Result<(), CloudError>;

    /// Create the REST façade with its routes and stage; returns the API id.
    async fn ensure_rest_api(&self, spec: &RestApiSpec) -> Result<Ensured<String>, CloudError>;

    /// Create the identity pool and its app client.
    async fn ensure_user_pool(&self, spec: &UserPoolSpec) -> Result<Ensured<UserPool>, CloudError>;

    /// Create the protocol gateway. Gateways provision asynchronously; poll
    /// [`CloudControl::gateway_status`] until `Ready`.
    async fn ensure_gateway(&self, spec: &GatewaySpec) -> Result<Ensured<Gateway>, CloudError>;

    /// Current lifecycle state of a gateway.
    async fn gateway_status(&self, gateway_id: &str) -> Result<GatewayState, CloudError>;

    /// Attach a target to a ready gateway; returns the target id.
    async fn ensure_gateway_target(&self, spec: &TargetSpec)
        -> Result<Ensured<String>, CloudError>;

    async fn delete_role(&self, role_name: &str) -> Result<(), CloudError>;
    async fn delete_function(&self, function_name: &str) -> Result<(), CloudError>;
    async fn delete_rest_api(&self, api_id: &str) -> Result<(), CloudError>;
    async fn delete_user_pool(&self, pool_id: &str) -> Result<(), CloudError>;
    async fn delete_gateway(&self, gateway_id: &str) -> Result<(), CloudError>;
    async fn delete_gateway_target(
        &self,
        gateway_id: &str,
        target_id: &str,
    ) -> Result<(), CloudError>;
}
