//! HTTP router and handlers: the tool catalog, invocation, admin listing,
//! and MCP JSON-RPC endpoints described in §6.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, warn};

use super::auth::{ResolvedAuthConfig, auth_middleware};
use super::trace;
use crate::auth_service::AuthServiceRegistry;
use crate::dynamic::{ArbitrarySqlRequest, CreateRequest, DynamicTool};
use crate::error::Error;
use crate::params::ClaimMap;
use crate::pipeline::{InvocationContext, Pipeline};
use crate::protocol::{
    Info, JsonRpcResponse, RequestId, ServerCapabilities, Tool as McpTool, ToolsCapability, PROTOCOL_VERSION,
};
use crate::security::sanitize_json_value;
use crate::source::SourceRegistry;

/// Shared application state.
pub struct AppState {
    /// The invocation pipeline (static + dynamic tool registries).
    pub pipeline: Arc<Pipeline>,
    /// The source registry, for admin listing.
    pub sources: Arc<SourceRegistry>,
    /// Configured auth services, consulted for both admin listing and
    /// per-request claim verification.
    pub auth_services: Arc<AuthServiceRegistry>,
    /// Gateway ingress authentication configuration.
    pub auth_config: Arc<ResolvedAuthConfig>,
    /// Whether to sanitize inbound JSON payloads before parameter binding.
    pub sanitize_input: bool,
}

/// Create the router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_config = Arc::clone(&state.auth_config);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/tool/{name}/", get(get_tool_manifest))
        .route("/api/tool/{name}/invoke", post(invoke_tool))
        .route("/admin/{resource}", get(admin_list))
        .route("/admin/toolset", post(create_dynamic_tool))
        .route("/admin/toolset/{name}", get(get_dynamic_tool).delete(remove_dynamic_tool))
        .route("/admin/toolset/{name}/release", post(release_dynamic_tool))
        .route("/admin/toolset/{name}/invoke", post(invoke_dynamic_tool))
        .route("/admin/arbitrary-sql", post(execute_arbitrary_sql))
        .route("/mcp", post(mcp_handler))
        .layer(middleware::from_fn_with_state(auth_config, auth_middleware))
        .layer(CompressionLayer::new())
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the per-request [`InvocationContext`] from the caller's headers:
/// each configured auth service reads its own credential header and, if it
/// verifies, contributes its name and claim map. The ingress `Authorization`
/// bearer token (if present) is forwarded as `access_token` for sources
/// configured for client-supplied OAuth.
fn build_invocation_context(state: &AppState, headers: &HeaderMap) -> InvocationContext {
    let mut verified_auth_services = Vec::new();
    let mut claims = ClaimMap::new();
    for name in state.auth_services.names() {
        let Some(service) = state.auth_services.get(&name) else {
            continue;
        };
        let credential = headers.get(service.credential_header()).and_then(|v| v.to_str().ok());
        if let Some(claim_map) = service.verify(credential) {
            verified_auth_services.push(name.clone());
            claims.insert(name, claim_map);
        }
    }

    let access_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(ToString::to_string);

    InvocationContext {
        verified_auth_services,
        claims,
        access_token,
        deadline: None,
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/tool/{name}/` -> `{tools: {<name>: Manifest}}`.
async fn get_tool_manifest(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> axum::response::Response {
    match state.pipeline.tools().get(&name) {
        Some(tool) => {
            let mut tools = serde_json::Map::new();
            tools.insert(name, tool.manifest());
            Json(json!({ "tools": tools })).into_response()
        }
        None => error_response(Error::NotFound(format!("tool: {name}"))),
    }
}

/// `POST /api/tool/{name}/invoke` -> `{result: ...}` or `{errorText: ...}`.
async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(mut payload): Json<Value>,
) -> axum::response::Response {
    if state.sanitize_input {
        payload = match sanitize_json_value(&payload) {
            Ok(v) => v,
            Err(e) => return error_response(e),
        };
    }

    let trace_id = trace::generate();
    let ctx = build_invocation_context(&state, &headers);

    trace::with_trace_id(trace_id, async {
        match state.pipeline.invoke(&name, &payload, &ctx).await {
            Ok(result) => Json(json!({ "result": rows_to_json(&result) })).into_response(),
            Err(e) => {
                warn!(tool = %name, error = %e, "invocation failed");
                error_response(e)
            }
        }
    })
    .await
}

fn rows_to_json(result: &crate::source::QueryResult) -> Value {
    if result.columns.len() == 1 && result.columns[0] == "value" && result.rows.len() == 1 {
        if let Some(v) = result.rows[0].get("value") {
            return v.clone();
        }
    }
    Value::Array(result.rows.iter().map(|r| Value::Object(r.clone())).collect())
}

/// `GET /admin/{resource}` listing names for `resource ∈ {source,
/// authservice, tool, toolset}`. `toolset` lists the live dynamic-tool
/// catalog, distinct from the static `tool` catalog.
async fn admin_list(State(state): State<Arc<AppState>>, Path(resource): Path<String>) -> axum::response::Response {
    let names = match resource.as_str() {
        "source" => state.sources.names(),
        "tool" => state.pipeline.tools().names(),
        "authservice" => state.auth_services.names(),
        "toolset" => state.pipeline.dynamic().list().await,
        _ => {
            return error_response(Error::NotFound(format!(
                "admin resource '{resource}'; valid values: source, authservice, tool, toolset"
            )));
        }
    };
    let mut body = serde_json::Map::new();
    body.insert(resource, json!(names));
    Json(Value::Object(body)).into_response()
}

fn dynamic_tool_json(tool: &DynamicTool) -> Value {
    json!({
        "name": tool.name,
        "sourceId": tool.source_id,
        "query": tool.query,
        "description": tool.description,
        "refCount": tool.ref_count(),
    })
}

#[derive(Deserialize)]
struct CreateDynamicToolRequest {
    name: String,
    #[serde(rename = "sourceId")]
    source_id: String,
    query: String,
    #[serde(default)]
    description: String,
}

/// `POST /admin/toolset` -> create a dynamic tool, `{name, sourceId, query,
/// description}` in, the created tool's manifest (with `refCount: 1`) out.
async fn create_dynamic_tool(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDynamicToolRequest>,
) -> axum::response::Response {
    let create_req = CreateRequest {
        name: req.name,
        source_id: req.source_id,
        query: req.query,
        description: req.description,
    };
    match state.pipeline.dynamic().create(create_req).await {
        Ok(tool) => (StatusCode::CREATED, Json(dynamic_tool_json(&tool))).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /admin/toolset/{name}` -> the dynamic tool's manifest, stamping
/// `lastAccess`.
async fn get_dynamic_tool(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> axum::response::Response {
    match state.pipeline.dynamic().get(&name).await {
        Ok(tool) => Json(dynamic_tool_json(&tool)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /admin/toolset/{name}/release` -> release the caller's hold on a
/// dynamic tool, decrementing its refCount.
async fn release_dynamic_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.pipeline.dynamic().release(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// `DELETE /admin/toolset/{name}` -> remove a dynamic tool. Fails with
/// `InUse` while any holder is still pinned.
async fn remove_dynamic_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.pipeline.dynamic().remove(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize, Default)]
struct InvokeDynamicToolRequest {
    #[serde(default)]
    params: Vec<Value>,
}

/// `POST /admin/toolset/{name}/invoke` -> run a dynamic tool through the
/// same invocation surface static tools use ([`Pipeline::invoke_dynamic`]).
async fn invoke_dynamic_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InvokeDynamicToolRequest>,
) -> axum::response::Response {
    let ctx = build_invocation_context(&state, &headers);
    match state.pipeline.invoke_dynamic(&name, &req.params, &ctx).await {
        Ok(result) => Json(json!({ "result": rows_to_json(&result) })).into_response(),
        Err(e) => {
            warn!(tool = %name, error = %e, "dynamic tool invocation failed");
            error_response(e)
        }
    }
}

#[derive(Deserialize, Default)]
struct ArbitrarySqlHttpRequest {
    #[serde(rename = "sourceId")]
    source_id: String,
    query: String,
    #[serde(default)]
    params: Vec<Value>,
    #[serde(default, rename = "dryRun")]
    dry_run: bool,
    #[serde(default, rename = "maxRows")]
    max_rows: Option<usize>,
    #[serde(default, rename = "timeoutSecs")]
    timeout_secs: Option<u64>,
}

/// `POST /admin/arbitrary-sql` -> run an ad hoc SQL statement against a
/// source by id without registering a persistent dynamic tool.
async fn execute_arbitrary_sql(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ArbitrarySqlHttpRequest>,
) -> axum::response::Response {
    let sql_req = ArbitrarySqlRequest {
        source_id: req.source_id,
        query: req.query,
        params: req.params,
        dry_run: req.dry_run,
        max_rows: req.max_rows,
        timeout: req.timeout_secs.map(Duration::from_secs),
    };
    match state.pipeline.dynamic().execute_arbitrary_sql(sql_req).await {
        Ok(result) => Json(json!({ "result": rows_to_json(&result) })).into_response(),
        Err(e) => error_response(e),
    }
}

/// MCP JSON-RPC endpoint: handles `initialize`, `tools/list`, and
/// `tools/call`; other methods get a `MethodNotFound` error.
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(value): Json<Value>,
) -> axum::response::Response {
    let (id, method, params) = match parse_request(&value) {
        Ok(parsed) => parsed,
        Err(err) => return (StatusCode::BAD_REQUEST, Json(serde_json::to_value(err).unwrap())).into_response(),
    };

    if is_notification_method(&method) {
        return StatusCode::ACCEPTED.into_response();
    }
    let Some(id) = id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::to_value(JsonRpcResponse::error(None, -32600, "Missing id")).unwrap()),
        )
            .into_response();
    };

    match method.as_str() {
        "initialize" => {
            let result = json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": ServerCapabilities {
                    tools: Some(ToolsCapability { list_changed: false }),
                    ..Default::default()
                },
                "serverInfo": Info {
                    name: "toolgate".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: None,
                    description: None,
                },
            });
            Json(serde_json::to_value(JsonRpcResponse::success(id, result)).unwrap()).into_response()
        }
        "tools/list" => {
            let tools: Vec<McpTool> = state
                .pipeline
                .tools()
                .names()
                .into_iter()
                .filter_map(|n| state.pipeline.tools().get(&n))
                .map(|t| t.mcp_manifest())
                .collect();
            Json(serde_json::to_value(JsonRpcResponse::success(id, json!({ "tools": tools }))).unwrap())
                .into_response()
        }
        "tools/call" => {
            let (tool_name, arguments) = extract_tools_call_params(params.as_ref());
            let arguments = if state.sanitize_input {
                match sanitize_json_value(&arguments) {
                    Ok(v) => v,
                    Err(e) => return error_response(e),
                }
            } else {
                arguments
            };
            let ctx = build_invocation_context(&state, &headers);
            match state.pipeline.invoke(tool_name, &arguments, &ctx).await {
                Ok(result) => {
                    let content: Vec<Value> = result
                        .rows
                        .iter()
                        .map(|row| json!({ "type": "text", "text": Value::Object(row.clone()).to_string() }))
                        .collect();
                    Json(serde_json::to_value(JsonRpcResponse::success(id, json!({ "content": content }))).unwrap())
                        .into_response()
                }
                Err(e) => {
                    error!(tool = %tool_name, error = %e, "tools/call failed");
                    let content = json!([{ "type": "text", "text": e.to_string() }]);
                    Json(
                        serde_json::to_value(JsonRpcResponse::success(
                            id,
                            json!({ "content": content, "isError": true }),
                        ))
                        .unwrap(),
                    )
                    .into_response()
                }
            }
        }
        other => {
            Json(serde_json::to_value(JsonRpcResponse::error(Some(id), -32601, format!("Unknown method: {other}"))).unwrap())
                .into_response()
        }
    }
}

/// Map a pipeline [`Error`] to an HTTP status + `{errorText: ...}` body.
fn error_response(err: Error) -> axum::response::Response {
    let status = StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "errorText": err.to_string() }))).into_response()
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0 spec.
/// Returns `None` if the value is not a recognised ID type.
fn extract_request_id(value: &Value) -> Option<RequestId> {
    if value.is_string() {
        Some(RequestId::String(value.as_str().unwrap().to_string()))
    } else if value.is_i64() {
        Some(RequestId::Number(value.as_i64().unwrap()))
    } else if value.is_u64() {
        #[allow(clippy::cast_possible_wrap)]
        Some(RequestId::Number(value.as_u64().unwrap() as i64))
    } else {
        None
    }
}

/// Check whether a method name represents a notification (no response expected).
fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Extract the `tools/call` parameters (tool name and arguments) from request params.
///
/// Returns `("", {})` when the expected fields are absent so callers never
/// need to deal with `Option`.
fn extract_tools_call_params(params: Option<&Value>) -> (&str, Value) {
    let tool_name = params
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or(json!({}));
    (tool_name, arguments)
}

/// Parse JSON-RPC request or notification.
/// Returns `(Option<RequestId>, method, params)` — id is `None` for notifications.
#[allow(clippy::result_large_err)] // JsonRpcResponse used directly as HTTP error body
fn parse_request(value: &Value) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(|v| v.as_str());
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(None, -32600, "Invalid JSON-RPC version"));
    }

    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| JsonRpcResponse::error(id.clone(), -32600, "Missing method"))?;

    let params = value.get("params").cloned();

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(None, -32600, "Missing id"));
    }

    Ok((id, method.to_string(), params))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // extract_request_id
    // =====================================================================

    #[test]
    fn extract_request_id_string_value() {
        let val = json!("abc-123");
        let id = extract_request_id(&val).unwrap();
        assert_eq!(id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn extract_request_id_positive_integer() {
        let val = json!(42);
        let id = extract_request_id(&val).unwrap();
        assert_eq!(id, RequestId::Number(42));
    }

    #[test]
    fn extract_request_id_negative_integer() {
        let val = json!(-1);
        let id = extract_request_id(&val).unwrap();
        assert_eq!(id, RequestId::Number(-1));
    }

    #[test]
    fn extract_request_id_null_returns_none() {
        let val = json!(null);
        assert!(extract_request_id(&val).is_none());
    }

    #[test]
    fn extract_request_id_array_returns_none() {
        let val = json!([1, 2]);
        assert!(extract_request_id(&val).is_none());
    }

    // =====================================================================
    // is_notification_method
    // =====================================================================

    #[test]
    fn notification_method_recognized() {
        assert!(is_notification_method("notifications/initialized"));
        assert!(is_notification_method("notifications/cancelled"));
    }

    #[test]
    fn regular_method_not_notification() {
        assert!(!is_notification_method("initialize"));
        assert!(!is_notification_method("tools/list"));
        assert!(!is_notification_method("tools/call"));
    }

    // =====================================================================
    // extract_tools_call_params
    // =====================================================================

    #[test]
    fn extract_tools_call_params_full() {
        let params = json!({"name": "my_tool", "arguments": {"key": "value"}});
        let (name, args) = extract_tools_call_params(Some(&params));
        assert_eq!(name, "my_tool");
        assert_eq!(args, json!({"key": "value"}));
    }

    #[test]
    fn extract_tools_call_params_missing_arguments() {
        let params = json!({"name": "my_tool"});
        let (name, args) = extract_tools_call_params(Some(&params));
        assert_eq!(name, "my_tool");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn extract_tools_call_params_none_input() {
        let (name, args) = extract_tools_call_params(None);
        assert_eq!(name, "");
        assert_eq!(args, json!({}));
    }

    // =====================================================================
    // parse_request
    // =====================================================================

    #[test]
    fn parse_request_valid_with_string_id() {
        let req = json!({"jsonrpc": "2.0", "id": "req-1", "method": "tools/list"});
        let (id, method, params) = parse_request(&req).unwrap();
        assert_eq!(id, Some(RequestId::String("req-1".to_string())));
        assert_eq!(method, "tools/list");
        assert!(params.is_none());
    }

    #[test]
    fn parse_request_valid_with_params() {
        let req = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "my_tool", "arguments": {"q": "test"}}
        });
        let (id, method, params) = parse_request(&req).unwrap();
        assert_eq!(id, Some(RequestId::Number(1)));
        assert_eq!(method, "tools/call");
        assert_eq!(params.unwrap()["name"], "my_tool");
    }

    #[test]
    fn parse_request_notification_without_id() {
        let req = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let (id, method, _params) = parse_request(&req).unwrap();
        assert!(id.is_none());
        assert_eq!(method, "notifications/initialized");
    }

    #[test]
    fn parse_request_missing_jsonrpc_field() {
        let req = json!({"id": 1, "method": "ping"});
        let err = parse_request(&req).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, -32600);
    }

    #[test]
    fn parse_request_missing_method() {
        let req = json!({"jsonrpc": "2.0", "id": 1});
        let err = parse_request(&req).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, -32600);
        assert!(err.error.as_ref().unwrap().message.contains("method"));
    }

    #[test]
    fn parse_request_non_notification_without_id() {
        let req = json!({"jsonrpc": "2.0", "method": "tools/list"});
        let err = parse_request(&req).unwrap_err();
        assert!(err.error.as_ref().unwrap().message.contains("id"));
    }
}
