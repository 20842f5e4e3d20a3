//! The pet-store demo stack definition
//!
//! Seven steps in dependency order: the function's execution role must exist
//! before the function that assumes it, the REST façade before the gateway
//! role's invoke policy that names its ARN, and the gateway must reach
//! `READY` before a target can attach to it.

use async_trait::async_trait;
use serde_json::json;

use crate::cloud::{
    CloudControl, CloudError, Ensured, FunctionSpec, GatewaySpec, GatewayState, RestApiSpec,
    RoleSpec, Route, TargetSpec, ToolOverride, UserPoolSpec,
};
use crate::config::{self, StackConfig};
use crate::manifest::{keys, Manifest};
use crate::step::{Registry, RegistryError, StackStep, StepOutcome};
use crate::wait::{poll_until, PollPolicy, PollState};

/// Manifest keys present before any step runs.
pub const SEEDED_KEYS: &[&str] = &[keys::REGION, keys::ACCOUNT_ID];

/// Inline source of the backend function. The packager turns this into the
/// opaque byte payload shipped with the function spec.
const HANDLER_SOURCE: &str = r#"import json

PETS = [
    {"id": 1, "type": "dog", "name": "Buddy", "price": 249.99},
    {"id": 2, "type": "cat", "name": "Whiskers", "price": 124.99},
    {"id": 3, "type": "fish", "name": "Nemo", "price": 0.99},
]


def lambda_handler(event, context):
    path = event.get('path', '')
    method = event.get('httpMethod', '')

    if path == '/pets' and method == 'GET':
        return _ok(PETS)
    if path == '/pets' and method == 'POST':
        pet = json.loads(event.get('body') or '{}')
        pet['id'] = max(p['id'] for p in PETS) + 1
        PETS.append(pet)
        return _ok(pet)
    if path.startswith('/pets/') and method == 'GET':
        pet_id = int(path.split('/')[-1])
        pet = next((p for p in PETS if p['id'] == pet_id), None)
        if pet:
            return _ok(pet)
        return {'statusCode': 404, 'body': json.dumps({'error': 'Pet not found'})}

    return {'statusCode': 404, 'body': json.dumps({'error': 'Not found'})}


def _ok(body):
    return {
        'statusCode': 200,
        'body': json.dumps(body),
        'headers': {'Content-Type': 'application/json'},
    }
"#;

/// Package inline source text into a deployable byte payload.
///
/// Collaborator boundary: the pipeline treats the result as opaque bytes. A
/// real provider binding would wrap this in the provider's archive format.
pub fn package_source(source: &str) -> Vec<u8> {
    source.as_bytes().to_vec()
}

fn routes() -> Vec<Route> {
    vec![
        Route {
            path: "/pets".into(),
            method: "GET".into(),
        },
        Route {
            path: "/pets".into(),
            method: "POST".into(),
        },
        Route {
            path: "/pets/{petId}".into(),
            method: "GET".into(),
        },
    ]
}

/// Tool names and descriptions the gateway target exposes. Tools surface to
/// clients namespaced as `PetStoreTarget___<name>`.
pub fn tool_overrides() -> Vec<ToolOverride> {
    vec![
        ToolOverride {
            name: "ListPets".into(),
            path: "/pets".into(),
            method: "GET".into(),
            description: "Retrieves all available pets in the store".into(),
        },
        ToolOverride {
            name: "GetPetById".into(),
            path: "/pets/{petId}".into(),
            method: "GET".into(),
            description: "Retrieve a specific pet by its ID".into(),
        },
        ToolOverride {
            name: "AddPet".into(),
            path: "/pets".into(),
            method: "POST".into(),
            description: "Add a new pet to the store".into(),
        },
    ]
}

/// Execution role for the backend function.
pub struct FunctionRoleStep;

#[async_trait]
impl StackStep for FunctionRoleStep {
    fn name(&self) -> &'static str {
        "function-role"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::FUNCTION_ROLE_ARN]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        _manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let spec = RoleSpec {
            name: config::FUNCTION_ROLE_NAME.into(),
            trust_service: "lambda.amazonaws.com".into(),
            description: "Execution role for the pet store backend function".into(),
            managed_policy_arns: vec![config::FUNCTION_EXECUTION_POLICY_ARN.into()],
            inline_policies: vec![],
        };
        match cloud.ensure_role(&spec).await {
            Ok(Ensured::Created(arn)) => {
                Ok(StepOutcome::Created(vec![(keys::FUNCTION_ROLE_ARN, arn)]))
            }
            Ok(Ensured::Existing(arn)) => {
                Ok(StepOutcome::AlreadyExists(vec![(keys::FUNCTION_ROLE_ARN, arn)]))
            }
            // Handles that report conflicts as errors: synthesize the ARN
            // from the well-known name instead of querying.
            Err(e) if e.is_already_exists() => Ok(StepOutcome::AlreadyExists(vec![(
                keys::FUNCTION_ROLE_ARN,
                config.role_arn(config::FUNCTION_ROLE_NAME),
            )])),
            Err(e) => Err(e.into()),
        }
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        _manifest: &Manifest,
    ) -> Result<(), CloudError> {
        cloud.delete_role(config::FUNCTION_ROLE_NAME).await
    }
}

/// The backend function, deployed from the inline handler source.
pub struct FunctionStep;

#[async_trait]
impl StackStep for FunctionStep {
    fn name(&self) -> &'static str {
        "function"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::FUNCTION_ROLE_ARN]
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::FUNCTION_ARN, keys::FUNCTION_NAME]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let spec = FunctionSpec {
            name: config::FUNCTION_NAME.into(),
            runtime: "python3.12".into(),
            handler: "lambda_function.lambda_handler".into(),
            role_arn: manifest.require(keys::FUNCTION_ROLE_ARN)?.into(),
            timeout_secs: 30,
            description: "Pet store API backend".into(),
            payload: package_source(HANDLER_SOURCE),
        };
        let outputs = |arn: String| {
            vec![
                (keys::FUNCTION_ARN, arn),
                (keys::FUNCTION_NAME, config::FUNCTION_NAME.to_string()),
            ]
        };
        match cloud.ensure_function(&spec).await {
            Ok(Ensured::Created(arn)) => Ok(StepOutcome::Created(outputs(arn))),
            Ok(Ensured::Existing(arn)) => Ok(StepOutcome::AlreadyExists(outputs(arn))),
            Err(e) if e.is_already_exists() => Ok(StepOutcome::AlreadyExists(outputs(
                config.function_arn(config::FUNCTION_NAME),
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        _manifest: &Manifest,
    ) -> Result<(), CloudError> {
        cloud.delete_function(config::FUNCTION_NAME).await
    }
}

/// REST façade proxying every route to the backend function, deployed to the
/// `prod` stage, with the gateway's invoke permission attached.
pub struct RestApiStep;

#[async_trait]
impl StackStep for RestApiStep {
    fn name(&self) -> &'static str {
        "rest-api"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::FUNCTION_ARN, keys::FUNCTION_NAME]
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::REST_API_ID, keys::REST_API_ENDPOINT]
    }

    // Deletion addresses the façade by id alone.
    fn teardown_requires(&self) -> &'static [&'static str] {
        &[keys::REST_API_ID]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let spec = RestApiSpec {
            name: config::REST_API_NAME.into(),
            description: "Sample pet store API fronted by the gateway".into(),
            routes: routes(),
            integration_arn: manifest.require(keys::FUNCTION_ARN)?.into(),
            stage: config::REST_API_STAGE.into(),
        };
        let ensured = cloud.ensure_rest_api(&spec).await?;
        let existed = ensured.existed();
        let api_id = ensured.into_inner();

        // Grant the façade permission to invoke the function. A duplicate
        // statement id means a previous run already granted it.
        let function_name = manifest.require(keys::FUNCTION_NAME)?;
        match cloud
            .allow_invoke(
                function_name,
                "apigateway-invoke",
                &config.execute_api_arn(&api_id),
            )
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }

        let outputs = vec![
            (keys::REST_API_ID, api_id.clone()),
            (keys::REST_API_ENDPOINT, config.rest_api_endpoint(&api_id)),
        ];
        Ok(if existed {
            StepOutcome::AlreadyExists(outputs)
        } else {
            StepOutcome::Created(outputs)
        })
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        manifest: &Manifest,
    ) -> Result<(), CloudError> {
        let api_id = manifest
            .require(keys::REST_API_ID)
            .map_err(CloudError::Other)?;
        cloud.delete_rest_api(api_id).await
    }
}

/// Service role the gateway assumes to invoke the deployed façade stage.
pub struct GatewayRoleStep;

#[async_trait]
impl StackStep for GatewayRoleStep {
    fn name(&self) -> &'static str {
        "gateway-role"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::REST_API_ID]
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::GATEWAY_ROLE_ARN]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let api_id = manifest.require(keys::REST_API_ID)?;
        let invoke_policy = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["execute-api:Invoke"],
                "Resource": config.execute_api_stage_arn(api_id),
            }],
        });
        let spec = RoleSpec {
            name: config::GATEWAY_ROLE_NAME.into(),
            trust_service: "bedrock-agentcore.amazonaws.com".into(),
            description: "Service role for the pet store gateway".into(),
            managed_policy_arns: vec![],
            inline_policies: vec![("APIGatewayAccess".into(), invoke_policy)],
        };
        match cloud.ensure_role(&spec).await {
            Ok(Ensured::Created(arn)) => {
                Ok(StepOutcome::Created(vec![(keys::GATEWAY_ROLE_ARN, arn)]))
            }
            Ok(Ensured::Existing(arn)) => {
                Ok(StepOutcome::AlreadyExists(vec![(keys::GATEWAY_ROLE_ARN, arn)]))
            }
            Err(e) if e.is_already_exists() => Ok(StepOutcome::AlreadyExists(vec![(
                keys::GATEWAY_ROLE_ARN,
                config.role_arn(config::GATEWAY_ROLE_NAME),
            )])),
            Err(e) => Err(e.into()),
        }
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        _manifest: &Manifest,
    ) -> Result<(), CloudError> {
        cloud.delete_role(config::GATEWAY_ROLE_NAME).await
    }
}

/// Identity pool and app client backing the gateway's JWT authorizer.
pub struct IdentityPoolStep;

#[async_trait]
impl StackStep for IdentityPoolStep {
    fn name(&self) -> &'static str {
        "identity-pool"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::USER_POOL_ID, keys::CLIENT_ID, keys::DISCOVERY_URL]
    }

    fn teardown_requires(&self) -> &'static [&'static str] {
        &[keys::USER_POOL_ID]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        config: &StackConfig,
        _manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let spec = UserPoolSpec {
            name: config::USER_POOL_NAME.into(),
            client_name: config::APP_CLIENT_NAME.into(),
            password_policy: Default::default(),
            auto_verified_attributes: vec!["email".into()],
        };
        let ensured = cloud.ensure_user_pool(&spec).await?;
        let existed = ensured.existed();
        let pool = ensured.into_inner();

        let outputs = vec![
            (keys::USER_POOL_ID, pool.pool_id.clone()),
            (keys::CLIENT_ID, pool.client_id),
            (keys::DISCOVERY_URL, config.discovery_url(&pool.pool_id)),
        ];
        Ok(if existed {
            StepOutcome::AlreadyExists(outputs)
        } else {
            StepOutcome::Created(outputs)
        })
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        manifest: &Manifest,
    ) -> Result<(), CloudError> {
        let pool_id = manifest
            .require(keys::USER_POOL_ID)
            .map_err(CloudError::Other)?;
        cloud.delete_user_pool(pool_id).await
    }
}

/// The protocol gateway. Provisioned asynchronously: after creation this step
/// polls until the gateway reports `READY`, with the terminal `FAILED` state
/// distinguished from a timeout.
pub struct GatewayStep {
    poll: PollPolicy,
}

impl GatewayStep {
    pub fn new(poll: PollPolicy) -> Self {
        Self { poll }
    }
}

#[async_trait]
impl StackStep for GatewayStep {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::GATEWAY_ROLE_ARN, keys::CLIENT_ID, keys::DISCOVERY_URL]
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::GATEWAY_ID, keys::GATEWAY_URL]
    }

    fn teardown_requires(&self) -> &'static [&'static str] {
        &[keys::GATEWAY_ID]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let spec = GatewaySpec {
            name: config::GATEWAY_NAME.into(),
            role_arn: manifest.require(keys::GATEWAY_ROLE_ARN)?.into(),
            protocol: "MCP".into(),
            allowed_clients: vec![manifest.require(keys::CLIENT_ID)?.into()],
            discovery_url: manifest.require(keys::DISCOVERY_URL)?.into(),
            description: "Gateway exposing the pet store API as tools".into(),
        };
        let ensured = cloud.ensure_gateway(&spec).await?;
        let existed = ensured.existed();
        let gateway = ensured.into_inner();

        poll_until(self.poll, "gateway", || {
            let id = gateway.id.clone();
            async move {
                match cloud.gateway_status(&id).await? {
                    GatewayState::Ready => Ok(PollState::Ready(())),
                    GatewayState::Creating => Ok(PollState::Pending),
                    GatewayState::Failed => {
                        Ok(PollState::Failed("gateway reported status FAILED".into()))
                    }
                }
            }
        })
        .await?;

        let outputs = vec![
            (keys::GATEWAY_ID, gateway.id),
            (keys::GATEWAY_URL, gateway.url),
        ];
        Ok(if existed {
            StepOutcome::AlreadyExists(outputs)
        } else {
            StepOutcome::Created(outputs)
        })
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        manifest: &Manifest,
    ) -> Result<(), CloudError> {
        let gateway_id = manifest
            .require(keys::GATEWAY_ID)
            .map_err(CloudError::Other)?;
        cloud.delete_gateway(gateway_id).await
    }
}

/// Target binding the deployed façade's routes to the gateway as tools.
pub struct GatewayTargetStep;

#[async_trait]
impl StackStep for GatewayTargetStep {
    fn name(&self) -> &'static str {
        "gateway-target"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::GATEWAY_ID, keys::REST_API_ID]
    }

    fn provides(&self) -> &'static [&'static str] {
        &[keys::TARGET_ID]
    }

    // Deleting a target addresses it through its parent gateway.
    fn teardown_requires(&self) -> &'static [&'static str] {
        &[keys::TARGET_ID, keys::GATEWAY_ID]
    }

    async fn provision(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        manifest: &Manifest,
    ) -> anyhow::Result<StepOutcome> {
        let spec = TargetSpec {
            name: config::TARGET_NAME.into(),
            gateway_id: manifest.require(keys::GATEWAY_ID)?.into(),
            rest_api_id: manifest.require(keys::REST_API_ID)?.into(),
            stage: config::REST_API_STAGE.into(),
            tool_overrides: tool_overrides(),
        };
        let ensured = cloud.ensure_gateway_target(&spec).await?;
        let existed = ensured.existed();
        let outputs = vec![(keys::TARGET_ID, ensured.into_inner())];
        Ok(if existed {
            StepOutcome::AlreadyExists(outputs)
        } else {
            StepOutcome::Created(outputs)
        })
    }

    async fn teardown(
        &self,
        cloud: &dyn CloudControl,
        _config: &StackConfig,
        manifest: &Manifest,
    ) -> Result<(), CloudError> {
        let gateway_id = manifest
            .require(keys::GATEWAY_ID)
            .map_err(CloudError::Other)?;
        let target_id = manifest
            .require(keys::TARGET_ID)
            .map_err(CloudError::Other)?;
        cloud.delete_gateway_target(gateway_id, target_id).await
    }
}

/// The full provisioning registry with the default readiness poll policy
/// (20 attempts, 10 s apart).
pub fn registry() -> Result<Registry, RegistryError> {
    registry_with_poll(PollPolicy::default())
}

/// The full provisioning registry with an injected poll policy. Tests use
/// [`PollPolicy::immediate`].
pub fn registry_with_poll(poll: PollPolicy) -> Result<Registry, RegistryError> {
    Registry::new(
        vec![
            Box::new(FunctionRoleStep),
            Box::new(FunctionStep),
            Box::new(RestApiStep),
            Box::new(GatewayRoleStep),
            Box::new(IdentityPoolStep),
            Box::new(GatewayStep::new(poll)),
            Box::new(GatewayTargetStep),
        ],
        SEEDED_KEYS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_dependency_ordered() {
        let registry = registry().expect("stack registry must validate");
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn every_manifest_key_is_produced_exactly_once() {
        let registry = registry().unwrap();
        let mut produced: Vec<&str> = Vec::new();
        for step in registry.steps() {
            for key in step.provides() {
                assert!(
                    !produced.contains(key),
                    "key `{key}` produced by more than one step"
                );
                produced.push(key);
            }
        }
        // Everything teardown or the tool client reads by fixed name.
        for key in [
            keys::FUNCTION_ROLE_ARN,
            keys::FUNCTION_ARN,
            keys::REST_API_ID,
            keys::GATEWAY_ROLE_ARN,
            keys::USER_POOL_ID,
            keys::CLIENT_ID,
            keys::DISCOVERY_URL,
            keys::GATEWAY_ID,
            keys::GATEWAY_URL,
            keys::TARGET_ID,
        ] {
            assert!(produced.contains(&key), "key `{key}` never produced");
        }
    }

    #[test]
    fn target_tools_cover_every_route() {
        let overrides = tool_overrides();
        for route in routes() {
            assert!(
                overrides
                    .iter()
                    .any(|t| t.path == route.path && t.method == route.method),
                "route {} {} has no tool override",
                route.method,
                route.path
            );
        }
    }

    #[test]
    fn packaged_source_is_nonempty_and_deterministic() {
        let a = package_source(HANDLER_SOURCE);
        let b = package_source(HANDLER_SOURCE);
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }
}
