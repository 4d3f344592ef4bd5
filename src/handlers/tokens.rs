// ---------------------------------------------------------------------------
// handlers/tokens.rs - MCP token management for the signed-in user
// ---------------------------------------------------------------------------

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use uuid::Uuid;

use super::ApiError;
use crate::auth::SessionPrincipal;
use crate::models::{IssueTokenRequest, IssuedTokenResponse, TokenListItem, TokenListResponse};
use crate::state::AppState;
use crate::store::CredentialRecord;

const DEFAULT_TOKEN_NAME: &str = "MCP token";
const MAX_NAME_LEN: usize = 128;

/// Trimmed, de-duplicated, order preserved.
fn normalize_scopes(scopes: Option<Vec<String>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for scope in scopes.unwrap_or_default() {
        let scope = scope.trim();
        if !scope.is_empty() && !out.iter().any(|s| s == scope) {
            out.push(scope.to_string());
        }
    }
    out
}

impl From<CredentialRecord> for TokenListItem {
    fn from(r: CredentialRecord) -> Self {
        TokenListItem {
            id: r.id.to_string(),
            name: r.name,
            key_prefix: r.key_prefix,
            scopes: r.scopes,
            expires_at: r.expires_at,
            last_used_at: r.last_used_at,
            created_at: r.created_at,
        }
    }
}

/// POST /api/mcp/tokens - the only response that ever carries the full token.
pub async fn create_token(
    State(state): State<AppState>,
    SessionPrincipal(user_id): SessionPrincipal,
    body: Result<Json<IssueTokenRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IssuedTokenResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e.body_text())))?;

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_TOKEN_NAME.to_string());
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!("name must be at most {MAX_NAME_LEN} characters")));
    }
    if req.expires_at.is_some_and(|exp| exp <= Utc::now()) {
        return Err(ApiError::BadRequest("expiresAt must be in the future".into()));
    }

    let issued = state
        .credentials
        .issue(&user_id, name, normalize_scopes(req.scopes), req.expires_at)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedTokenResponse {
            token: issued.token,
            id: issued.record.id.to_string(),
            name: issued.record.name,
            scopes: issued.record.scopes,
            expires_at: issued.record.expires_at,
        }),
    ))
}

/// GET /api/mcp/tokens - newest first, never includes secrets.
pub async fn list_tokens(
    State(state): State<AppState>,
    SessionPrincipal(user_id): SessionPrincipal,
) -> Result<Json<TokenListResponse>, ApiError> {
    let records = state.credentials.list_by_principal(&user_id).await?;
    Ok(Json(TokenListResponse {
        items: records.into_iter().map(TokenListItem::from).collect(),
    }))
}

/// DELETE /api/mcp/tokens/{id} - owner only.
pub async fn delete_token(
    State(state): State<AppState>,
    SessionPrincipal(user_id): SessionPrincipal,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::NotFound(format!("MCP token {id}")))?;
    state.credentials.delete(id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
