//! Stack configuration and well-known resource names
//!
//! Every resource the demo stack creates has a fixed, well-known name. This is
//! what makes the pipeline idempotent: a second run addresses the same names,
//! and identifiers for name-addressed resources can be synthesized without
//! querying the control plane.

use std::path::PathBuf;

/// Default region when none is given on the command line.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Placeholder account used by the local control plane when none is given on
/// the command line.
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";

/// Default manifest location, relative to the working directory.
pub const DEFAULT_MANIFEST_PATH: &str = "deployment-manifest.json";

/// Default bearer-token location, relative to the working directory.
///
/// The token is an input to the tool-invocation client; this pipeline never
/// writes it.
pub const DEFAULT_TOKEN_PATH: &str = "access-token.txt";

/// Execution role assumed by the backend function.
pub const FUNCTION_ROLE_NAME: &str = "PetStoreFunctionRole";

/// The backend function itself.
pub const FUNCTION_NAME: &str = "PetStoreFunction";

/// REST façade in front of the backend function.
pub const REST_API_NAME: &str = "PetStoreApi";

/// Stage the REST façade is deployed to.
pub const REST_API_STAGE: &str = "prod";

/// Service role assumed by the protocol gateway to invoke the façade.
pub const GATEWAY_ROLE_NAME: &str = "PetStoreGatewayRole";

/// Identity pool backing the gateway's JWT authorizer.
pub const USER_POOL_NAME: &str = "PetStoreUserPool";

/// App client within the identity pool.
pub const APP_CLIENT_NAME: &str = "PetStoreClient";

/// The protocol gateway.
pub const GATEWAY_NAME: &str = "PetStoreGateway";

/// Gateway target binding the REST façade's routes as tools.
pub const TARGET_NAME: &str = "PetStoreTarget";

/// Managed policy granting the backend function basic log access.
pub const FUNCTION_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Fixed external configuration for a provisioning or teardown run.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Account the stack is provisioned into.
    pub account_id: String,
    /// Region the stack is provisioned into.
    pub region: String,
    /// Where the manifest is persisted.
    pub manifest_path: PathBuf,
    /// Where the cached bearer token lives.
    pub token_path: PathBuf,
}

impl StackConfig {
    /// Create a config with default file locations.
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
        }
    }

    /// Synthesize the ARN of a role from its well-known name.
    pub fn role_arn(&self, role_name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, role_name)
    }

    /// Synthesize the ARN of the backend function from its well-known name.
    pub fn function_arn(&self, function_name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account_id, function_name
        )
    }

    /// ARN prefix covering every method/stage of a REST façade, used for the
    /// function invoke permission.
    pub fn execute_api_arn(&self, api_id: &str) -> String {
        format!(
            "arn:aws:execute-api:{}:{}:{}/*/*",
            self.region, self.account_id, api_id
        )
    }

    /// Resource string the gateway role's invoke policy names.
    pub fn execute_api_stage_arn(&self, api_id: &str) -> String {
        format!(
            "arn:aws:execute-api:{}:{}:{}/{}/*/*",
            self.region, self.account_id, api_id, REST_API_STAGE
        )
    }

    /// Public base URL of the deployed REST façade.
    pub fn rest_api_endpoint(&self, api_id: &str) -> String {
        format!(
            "https://{}.execute-api.{}.amazonaws.com/{}",
            api_id, self.region, REST_API_STAGE
        )
    }

    /// OpenID discovery URL for an identity pool, consumed by the gateway's
    /// JWT authorizer.
    pub fn discovery_url(&self, user_pool_id: &str) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}/.well-known/openid-configuration",
            self.region, user_pool_id
        )
    }
}
