// Postgres adapters for the credential and session tables (see migrations/).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::{CredentialRecord, NewCredential, StoreError, TokenStore};
use crate::auth::SessionIdentity;
use crate::models::UserId;

const TOKEN_COLUMNS: &str = "id, user_id, name, key_prefix, token_hash, scopes, expires_at, last_used_at, created_at";

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    user_id: String,
    name: String,
    key_prefix: String,
    token_hash: String,
    scopes: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for CredentialRecord {
    fn from(row: TokenRow) -> Self {
        CredentialRecord {
            id: row.id,
            user_id: UserId(row.user_id),
            name: row.name,
            key_prefix: row.key_prefix,
            token_hash: row.token_hash,
            scopes: row.scopes,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create(&self, new: NewCredential) -> Result<CredentialRecord, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "INSERT INTO mcp_tokens (id, user_id, name, key_prefix, token_hash, scopes, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id.as_str())
        .bind(&new.name)
        .bind(&new.key_prefix)
        .bind(&new.token_hash)
        .bind(&new.scopes)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM mcp_tokens WHERE key_prefix = $1 LIMIT 1"
        ))
        .bind(key_prefix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM mcp_tokens WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<CredentialRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM mcp_tokens WHERE user_id = $1 ORDER BY created_at DESC, id ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM mcp_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE mcp_tokens SET last_used_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Session identity ────────────────────────────────────────────────────────

/// Resolves REST session bearers against `user_sessions`. Only the SHA-256 of
/// a session token is stored, so the lookup hashes before querying.
#[derive(Clone)]
pub struct PgSessionIdentity {
    pool: PgPool,
}

impl PgSessionIdentity {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn session_token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[async_trait]
impl SessionIdentity for PgSessionIdentity {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        let user_id: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM user_sessions \
             WHERE token_hash = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(session_token_hash(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id.map(UserId))
    }
}
