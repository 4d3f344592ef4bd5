// Session authentication for the REST surface.
// Every `/api/*` route that needs an identity takes a `SessionPrincipal`
// argument. MCP tokens are refused here; they are only valid on `/mcp/rss`.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::credentials::TOKEN_MARKER;
use crate::handlers::ApiError;
use crate::models::UserId;
use crate::state::AppState;
use crate::store::StoreError;

/// Resolves an ordinary session bearer to the user it belongs to.
#[async_trait]
pub trait SessionIdentity: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError>;
}

/// Authenticated REST caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPrincipal(pub UserId);

impl FromRequestParts<AppState> for SessionPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => {
                tracing::warn!("Auth failed: missing or malformed Authorization header");
                return Err(ApiError::Unauthorized("Authentication required".into()));
            }
        };

        if token.starts_with(TOKEN_MARKER) {
            tracing::warn!("Auth failed: MCP token presented to session route");
            return Err(ApiError::Unauthorized("Session token required".into()));
        }

        match state.sessions.resolve(token).await {
            Ok(Some(user_id)) => Ok(SessionPrincipal(user_id)),
            Ok(None) => {
                tracing::warn!("Auth failed: unknown session token");
                Err(ApiError::Unauthorized("Invalid session".into()))
            }
            Err(e) => Err(ApiError::Internal(format!("session lookup failed: {e}"))),
        }
    }
}
