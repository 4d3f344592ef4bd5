//! JSON-RPC 2.0 envelope types for the MCP endpoint.
//!
//! Only single requests with by-name params are supported. The request `id`
//! is kept as `Option<Value>` so that an absent id and an explicit `null`
//! survive the round trip unchanged.

use axum::http::StatusCode;
use serde::Serialize;
use serde::ser::Serializer;
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Unauthorized,
    Forbidden,
}

impl RpcErrorCode {
    pub fn code(self) -> i32 {
        match self {
            RpcErrorCode::ParseError => -32700,
            RpcErrorCode::InvalidRequest => -32600,
            RpcErrorCode::MethodNotFound => -32601,
            RpcErrorCode::InvalidParams => -32602,
            RpcErrorCode::InternalError => -32603,
            RpcErrorCode::Unauthorized => -32001,
            RpcErrorCode::Forbidden => -32003,
        }
    }

    /// Transport status carried alongside the envelope.
    pub fn http_status(self) -> StatusCode {
        match self {
            RpcErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            RpcErrorCode::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::OK,
        }
    }
}

impl Serialize for RpcErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(RpcErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidParams, message)
    }

    /// Never carries internal detail; callers log that separately.
    pub fn internal() -> Self {
        Self::new(RpcErrorCode::InternalError, "Internal error")
    }
}

/// Parsed request envelope.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub id: Option<Value>,
    pub method: String,
    pub params: Map<String, Value>,
}

impl RpcRequest {
    /// Validates the envelope shape. On failure the id (if it was readable)
    /// comes back with the error so it can still be echoed.
    pub fn from_value(value: Value) -> Result<Self, (Option<Value>, RpcError)> {
        let mut object = match value {
            Value::Object(map) => map,
            Value::Array(_) => {
                return Err((
                    Some(Value::Null),
                    RpcError::invalid_request("Batch requests are not supported"),
                ));
            }
            _ => {
                return Err((
                    Some(Value::Null),
                    RpcError::invalid_request("Request must be a JSON object"),
                ));
            }
        };

        let id = match object.remove("id") {
            None => None,
            Some(id @ (Value::Null | Value::String(_) | Value::Number(_))) => Some(id),
            Some(_) => {
                return Err((
                    Some(Value::Null),
                    RpcError::invalid_request("id must be a string, number or null"),
                ));
            }
        };

        match object.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            _ => {
                return Err((id, RpcError::invalid_request("jsonrpc must be \"2.0\"")));
            }
        }

        let method = match object.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            _ => return Err((id, RpcError::invalid_request("Missing or invalid method"))),
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(Value::Array(_)) => {
                return Err((id, RpcError::invalid_params("Positional params are not supported")));
            }
            Some(_) => return Err((id, RpcError::invalid_request("params must be an object"))),
        };

        Ok(Self { id, method, params })
    }
}

/// Response envelope. Exactly one of `result`/`error` is set; `id` is omitted
/// only when the request carried none.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        self.error
            .as_ref()
            .map_or(StatusCode::OK, |e| e.code.http_status())
    }
}
