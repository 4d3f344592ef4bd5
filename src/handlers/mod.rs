// ---------------------------------------------------------------------------
// handlers/ - REST surface
// Sub-modules group routes by concern; mod.rs re-exports the handlers
// that lib.rs mounts.
// ---------------------------------------------------------------------------

pub(crate) mod llm;
pub(crate) mod system;
pub(crate) mod tokens;

pub use llm::{llm_models, llm_query, llm_stream};
pub use system::{health, readiness};
pub use tokens::{create_token, delete_token, list_tokens};

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::credentials::CredentialError;
use crate::llm::LlmError;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Centralized API error type for all REST handlers.
/// Logs full details server-side, returns sanitized JSON to the client.
///
/// Response format:
/// ```json
/// {
///   "error": {
///     "code": "BAD_REQUEST",
///     "message": "Human-readable description",
///     "request_id": "uuid",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable error code string for each variant.
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sanitized message safe to return to clients. Variants that may carry
    /// upstream or storage detail return a generic message.
    fn sanitized_message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::Unauthorized(m) => m.clone(),
            ApiError::Forbidden(_) => "Forbidden".to_string(),
            ApiError::NotFound(_) => "Resource not found".to_string(),
            ApiError::Upstream(_) => "Upstream service error".to_string(),
            ApiError::UpstreamTimeout(_) => "Upstream service timed out".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }

    fn body(&self, request_id: &str, details: Option<Value>) -> Value {
        json!({
            "error": {
                "code": self.error_code(),
                "message": self.sanitized_message(),
                "request_id": request_id,
                "details": details,
            }
        })
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let request_id = Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(request_id = %request_id, code = self.error_code(), "API error ({}): {}", status.as_u16(), self);
        } else {
            tracing::warn!(request_id = %request_id, code = self.error_code(), "API error ({}): {}", status.as_u16(), self);
        }

        (status, Json(self.body(&request_id, None))).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound => ApiError::NotFound("MCP token".into()),
            CredentialError::Forbidden => ApiError::Forbidden("MCP token owned by another user".into()),
            CredentialError::Storage(e) => ApiError::Internal(e.to_string()),
            CredentialError::Crypto(e) => ApiError::Internal(e),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        let detail = err.log_detail();
        match err {
            LlmError::Transport(e) if e.is_timeout() => ApiError::UpstreamTimeout(detail),
            LlmError::Transport(_)
            | LlmError::Upstream { .. }
            | LlmError::Decode(_)
            | LlmError::EmptyResult
            | LlmError::StreamAbort(_) => ApiError::Upstream(detail),
            LlmError::MissingApiKey(_) | LlmError::RelayClosed | LlmError::Cancelled => ApiError::Internal(detail),
        }
    }
}
