//! Record store seam for MCP credentials.
//!
//! The service never talks to a database directly: credentials are created,
//! looked up and deleted through [`TokenStore`]. Two adapters ship with the
//! crate, an in-memory one (dev mode, tests) and a Postgres one (`sqlx`).
//! Every mutation is atomic at single-record granularity; nothing here needs
//! cross-record transactions.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::UserId;

pub use memory::{MemoryTokenStore, StaticSessionIdentity};
pub use postgres::{PgSessionIdentity, PgTokenStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint hit (duplicate key-prefix).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// A persisted MCP credential. Holds the hash of the secret half, never the
/// secret itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub key_prefix: String,
    pub token_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Fields supplied by the issuer; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub user_id: UserId,
    pub name: String,
    pub key_prefix: String,
    pub token_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a new credential. Fails with [`StoreError::Conflict`] when the
    /// key-prefix is already taken.
    async fn create(&self, new: NewCredential) -> Result<CredentialRecord, StoreError>;

    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Option<CredentialRecord>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, StoreError>;

    /// All credentials owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<CredentialRecord>, StoreError>;

    /// Returns `false` when no record with `id` existed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}
