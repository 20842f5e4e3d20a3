//! JSON-RPC tool-invocation client for the deployed gateway
//!
//! Fixed wire shape, used identically by every caller: POST a JSON-RPC 2.0
//! envelope to the gateway URL with a bearer token, then unwrap
//! `result.content[0].text` as JSON. Tool errors come back as error strings,
//! never panics — the payload is surfaced raw so the operator can see what
//! the gateway actually said.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Separator between a target name and a tool name on the wire.
const TOOL_NAMESPACE_SEPARATOR: &str = "___";

/// One tool advertised by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
}

/// Full wire name of a tool exposed through a target.
pub fn namespaced_tool(target: &str, tool: &str) -> String {
    format!("{target}{TOOL_NAMESPACE_SEPARATOR}{tool}")
}

/// Load the bearer token from local storage, newline-trimmed.
///
/// The token is a precondition: this pipeline never creates it.
pub fn load_access_token(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("no access token at {}", path.display()))?;
    let token = raw.trim().to_string();
    anyhow::ensure!(!token.is_empty(), "access token at {} is empty", path.display());
    Ok(token)
}

/// Thin HTTP client for the gateway's JSON-RPC endpoint.
pub struct ToolClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    next_id: AtomicU64,
}

impl ToolClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn post(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = envelope(id, method, params);
        debug!(method = %method, id, url = %self.base_url, "Sending tool request");

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.base_url))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("gateway returned non-JSON response (HTTP {status})"))?;
        Ok(payload)
    }

    /// `tools/list`: every tool the gateway exposes.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let payload = self.post("tools/list", None).await?;
        parse_tool_list(&payload)
    }

    /// `tools/call`: invoke one namespaced tool. Gateway-reported errors come
    /// back as the `Err(String)` variant; callers print them, they do not
    /// unwind.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String> {
        let params = json!({ "name": name, "arguments": arguments });
        let payload = self
            .post("tools/call", Some(params))
            .await
            .map_err(|e| format!("{e:#}"))?;
        unwrap_tool_response(&payload)
    }
}

/// The fixed JSON-RPC 2.0 request envelope.
fn envelope(id: u64, method: &str, params: Option<Value>) -> Value {
    let mut body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
    });
    if let Some(params) = params {
        body["params"] = params;
    }
    body
}

/// Unwrap a `tools/call` response: extract `result.content[0].text` and parse
/// it as JSON. Anything else — an `error` member, a missing field, text that
/// is not JSON — becomes an error string carrying the raw payload.
pub fn unwrap_tool_response(payload: &Value) -> Result<Value, String> {
    if let Some(error) = payload.get("error") {
        return Err(format!("tool call failed: {error}"));
    }
    let text = payload
        .get("result")
        .and_then(|r| r.get("content"))
        .and_then(|c| c.get(0))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| format!("unexpected tool response shape: {payload}"))?;
    serde_json::from_str(text)
        .map_err(|_| format!("tool returned non-JSON content: {text}"))
}

/// Parse a `tools/list` response into tool descriptors.
pub fn parse_tool_list(payload: &Value) -> Result<Vec<ToolInfo>> {
    let tools = payload
        .get("result")
        .and_then(|r| r.get("tools"))
        .and_then(Value::as_array)
        .with_context(|| format!("unexpected tools/list response shape: {payload}"))?;
    Ok(tools
        .iter()
        .filter_map(|tool| {
            Some(ToolInfo {
                name: tool.get("name")?.as_str()?.to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_nested_json_content() {
        let payload = json!({
            "result": {
                "content": [
                    {"text": "{\"id\":2,\"name\":\"Whiskers\"}"}
                ]
            }
        });
        let value = unwrap_tool_response(&payload).unwrap();
        assert_eq!(value, json!({"id": 2, "name": "Whiskers"}));
    }

    #[test]
    fn gateway_error_becomes_error_string_not_panic() {
        let payload = json!({"error": {"message": "boom"}});
        let err = unwrap_tool_response(&payload).unwrap_err();
        assert!(err.contains("boom"));
    }

    #[test]
    fn non_json_content_is_surfaced_raw() {
        let payload = json!({"result": {"content": [{"text": "plain words"}]}});
        let err = unwrap_tool_response(&payload).unwrap_err();
        assert!(err.contains("plain words"));
    }

    #[test]
    fn missing_content_is_an_error_with_payload() {
        let payload = json!({"result": {}});
        let err = unwrap_tool_response(&payload).unwrap_err();
        assert!(err.contains("unexpected tool response shape"));
    }

    #[test]
    fn parses_tool_list_with_optional_descriptions() {
        let payload = json!({
            "result": {
                "tools": [
                    {"name": "PetStoreTarget___ListPets", "description": "Retrieves all available pets"},
                    {"name": "PetStoreTarget___AddPet"}
                ]
            }
        });
        let tools = parse_tool_list(&payload).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "PetStoreTarget___ListPets");
        assert!(tools[0].description.is_some());
        assert!(tools[1].description.is_none());
    }

    #[test]
    fn tool_names_are_namespaced_with_triple_underscore() {
        assert_eq!(
            namespaced_tool("PetStoreTarget", "GetPetById"),
            "PetStoreTarget___GetPetById"
        );
    }

    #[test]
    fn envelope_matches_the_fixed_wire_shape() {
        let body = envelope(7, "tools/call", Some(json!({"name": "t", "arguments": {}})));
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 7);
        assert_eq!(body["method"], "tools/call");
        assert_eq!(body["params"]["name"], "t");
    }

    #[test]
    fn token_is_newline_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access-token.txt");
        std::fs::write(&path, "eyJraWQiOi...\n").unwrap();
        assert_eq!(load_access_token(&path).unwrap(), "eyJraWQiOi...");
    }

    #[test]
    fn missing_token_file_is_a_context_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_access_token(&dir.path().join("absent.txt")).unwrap_err();
        assert!(format!("{err:#}").contains("no access token"));
    }
}
