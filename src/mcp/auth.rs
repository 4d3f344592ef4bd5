//! Bearer authentication for the MCP endpoint.
//!
//! Only `MCP-<prefix>_<secret>` tokens are accepted here. A miss on the prefix
//! and a wrong secret both report [`AuthError::Invalid`], and both pay for one
//! Argon2 verification.

use chrono::Utc;
use uuid::Uuid;

use crate::credentials::{CredentialError, CredentialService, TOKEN_MARKER};
use crate::models::UserId;

const WILDCARD_SCOPE: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("malformed MCP token")]
    InvalidFormat,

    #[error("invalid MCP token")]
    Invalid,

    #[error("credential lookup failed: {0}")]
    Store(String),
}

/// Identity resolved from a verified MCP token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpPrincipal {
    pub user_id: UserId,
    pub token_id: Uuid,
    pub scopes: Vec<String>,
}

impl McpPrincipal {
    /// An empty scope set is unrestricted. Otherwise the exact scope, its
    /// family wildcard (`llm:*` for `llm:ask`) or `*` must be present.
    pub fn allows(&self, scope: &str) -> bool {
        if self.scopes.is_empty() {
            return true;
        }
        let family = scope.split_once(':').map(|(family, _)| format!("{family}:*"));
        self.scopes.iter().any(|held| {
            held == scope || held == WILDCARD_SCOPE || family.as_deref() == Some(held.as_str())
        })
    }
}

/// Splits `Bearer MCP-<prefix>_<secret>` into prefix and secret.
pub fn parse_bearer(header: &str) -> Result<(&str, &str), AuthError> {
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::InvalidFormat)?.trim();
    let rest = token.strip_prefix(TOKEN_MARKER).ok_or(AuthError::InvalidFormat)?;
    match rest.split_once('_') {
        Some((prefix, secret)) if !prefix.is_empty() && !secret.is_empty() => Ok((prefix, secret)),
        _ => Err(AuthError::InvalidFormat),
    }
}

#[derive(Clone)]
pub struct McpAuthenticator {
    credentials: CredentialService,
}

impl McpAuthenticator {
    pub fn new(credentials: CredentialService) -> Self {
        Self { credentials }
    }

    pub async fn authenticate(&self, header: Option<&str>) -> Result<McpPrincipal, AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let (prefix, secret) = parse_bearer(header)?;
        let hasher = self.credentials.hasher();

        let record = match self.credentials.find_by_prefix(prefix).await {
            Ok(record) => record,
            Err(CredentialError::NotFound) => {
                hasher.burn(secret.to_string()).await;
                tracing::warn!(key_prefix = %prefix, "MCP auth failed: unknown prefix");
                return Err(AuthError::Invalid);
            }
            Err(e) => return Err(AuthError::Store(e.to_string())),
        };

        if !hasher.verify(secret.to_string(), record.token_hash.clone()).await {
            tracing::warn!(token_id = %record.id, "MCP auth failed: secret mismatch");
            return Err(AuthError::Invalid);
        }

        let now = Utc::now();
        if record.is_expired_at(now) {
            tracing::warn!(token_id = %record.id, "MCP auth failed: token expired");
            return Err(AuthError::Invalid);
        }

        // Best-effort; the request does not wait on it.
        let store = self.credentials.store().clone();
        let token_id = record.id;
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(token_id, now).await {
                tracing::warn!(token_id = %token_id, "failed to record MCP token use: {}", e);
            }
        });

        Ok(McpPrincipal {
            user_id: record.user_id,
            token_id: record.id,
            scopes: record.scopes,
        })
    }
}
