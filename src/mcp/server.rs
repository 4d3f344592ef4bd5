//! MCP JSON-RPC endpoint (`POST /mcp/rss`).
//!
//! One pass per request: parse, check the envelope, authenticate the MCP
//! token, route, execute, respond. Any failed step answers with a JSON-RPC
//! error immediately.
//!
//! Supported methods:
//! - `initialize` - server info + capabilities
//! - `ping` - liveness
//! - `tools/list` - the fixed tool catalogue
//! - `tools/call` - run a tool by name
//! - `llm.summarize` / `llm.translate` / `llm.ask` - direct invocation

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use serde_json::{Map, Value, json};

use super::auth::{AuthError, McpPrincipal};
use super::rpc::{RpcError, RpcErrorCode, RpcRequest, RpcResponse};
use super::tools::{RegisteredTool, ToolContext, ToolError, ToolOutput};
use crate::llm::LlmError;
use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "fm-rss-mcp";

pub async fn mcp_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<RpcResponse>) {
    let response = dispatch(&state, &headers, &body).await;
    (response.http_status(), Json(response))
}

async fn dispatch(state: &AppState, headers: &HeaderMap, body: &[u8]) -> RpcResponse {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("MCP server: unparseable body: {}", e);
            return RpcResponse::failure(Some(Value::Null), RpcError::parse_error("Parse error"));
        }
    };

    let request = match RpcRequest::from_value(value) {
        Ok(r) => r,
        Err((id, err)) => return RpcResponse::failure(id, err),
    };

    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let principal = match state.mcp_auth.authenticate(auth_header).await {
        Ok(p) => p,
        Err(AuthError::Store(detail)) => {
            tracing::error!(method = %request.method, "MCP auth backend failure: {}", detail);
            return RpcResponse::failure(request.id, RpcError::internal());
        }
        Err(e) => {
            tracing::debug!(method = %request.method, "MCP auth rejected: {}", e);
            return RpcResponse::failure(
                request.id,
                RpcError::new(RpcErrorCode::Unauthorized, "invalid MCP token"),
            );
        }
    };

    tracing::debug!(method = %request.method, user_id = %principal.user_id, "MCP server: incoming request");

    let RpcRequest { id, method, params } = request;
    match route(state, &principal, &method, params).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(err) => RpcResponse::failure(id, err),
    }
}

async fn route(
    state: &AppState,
    principal: &McpPrincipal,
    method: &str,
    params: Map<String, Value>,
) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": state.tools.descriptors() })),
        "tools/call" => handle_tools_call(state, principal, params).await,
        _ => match state.tools.get(method) {
            Some(tool) => {
                let output = run_tool(state, principal, tool, Value::Object(params)).await?;
                Ok(Value::String(output.text))
            }
            None => Err(RpcError::method_not_found(method)),
        },
    }
}

// ── initialize ──────────────────────────────────────────────────────────────

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

// ── tools/call ──────────────────────────────────────────────────────────────

async fn handle_tools_call(
    state: &AppState,
    principal: &McpPrincipal,
    mut params: Map<String, Value>,
) -> Result<Value, RpcError> {
    let name = match params.remove("name") {
        Some(Value::String(n)) if !n.is_empty() => n,
        _ => return Err(RpcError::invalid_params("Missing 'name' in params")),
    };
    let arguments = match params.remove("arguments") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args @ Value::Object(_)) => args,
        Some(_) => return Err(RpcError::invalid_params("'arguments' must be an object")),
    };

    let tool = state
        .tools
        .get(&name)
        .ok_or_else(|| RpcError::new(RpcErrorCode::MethodNotFound, format!("Tool not found: {name}")))?;

    let output = run_tool(state, principal, tool, arguments).await?;
    Ok(json!({
        "content": [{ "type": "text", "text": output.text }],
        "isError": false,
        "model": output.model,
    }))
}

async fn run_tool(
    state: &AppState,
    principal: &McpPrincipal,
    tool: &RegisteredTool,
    arguments: Value,
) -> Result<ToolOutput, RpcError> {
    let name = tool.tool().name();
    if !principal.allows(tool.tool().scope()) {
        tracing::warn!(tool = name, user_id = %principal.user_id, token_id = %principal.token_id, "MCP token lacks scope");
        return Err(RpcError::new(RpcErrorCode::Forbidden, "Insufficient scope")
            .with_data(json!({ "requiredScope": tool.tool().scope() })));
    }

    let ctx = ToolContext {
        llm: &state.llm,
        default_model: &state.config.llm.default_model,
        principal,
    };

    tool.execute(arguments, &ctx).await.map_err(|e| match e {
        ToolError::InvalidParams(message) => RpcError::invalid_params(message),
        ToolError::Llm(err) => {
            tracing::error!(tool = name, user_id = %principal.user_id, "MCP tool failed: {}", err.log_detail());
            RpcError::internal().with_data(json!({ "reason": failure_reason(&err) }))
        }
    })
}

/// Coarse, non-leaking category for the `data` of an internal error.
fn failure_reason(err: &LlmError) -> &'static str {
    match err {
        LlmError::MissingApiKey(_) => "upstream_not_configured",
        LlmError::Transport(e) if e.is_timeout() => "upstream_timeout",
        LlmError::Transport(_) => "upstream_unreachable",
        LlmError::Upstream { .. } => "upstream_error",
        LlmError::Decode(_) => "upstream_bad_response",
        LlmError::EmptyResult => "empty_result",
        LlmError::StreamAbort(_) | LlmError::RelayClosed | LlmError::Cancelled => "stream_aborted",
    }
}
