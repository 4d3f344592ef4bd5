// In-memory adapters: used when no DATABASE_URL is configured, and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CredentialRecord, NewCredential, StoreError, TokenStore};
use crate::auth::SessionIdentity;
use crate::models::UserId;

#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<Uuid, CredentialRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(&self, new: NewCredential) -> Result<CredentialRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.key_prefix == new.key_prefix) {
            return Err(StoreError::Conflict(format!(
                "key prefix {} already exists",
                new.key_prefix
            )));
        }

        let record = CredentialRecord {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            key_prefix: new.key_prefix,
            token_hash: new.token_hash,
            scopes: new.scopes,
            expires_at: new.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().find(|r| r.key_prefix == key_prefix).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<CredentialRecord>, StoreError> {
        let records = self.records.read().await;
        let mut owned: Vec<CredentialRecord> = records
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }
}

// ── Static session identity ─────────────────────────────────────────────────

/// Fixed table of session tokens. Every lookup compares against all entries
/// in constant time per entry.
#[derive(Default)]
pub struct StaticSessionIdentity {
    sessions: Vec<(String, UserId)>,
}

impl StaticSessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.sessions.push((token.into(), UserId::new(user_id)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionIdentity for StaticSessionIdentity {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        let mut found = None;
        for (candidate, user_id) in &self.sessions {
            if bool::from(candidate.as_bytes().ct_eq(token.as_bytes())) {
                found = Some(user_id.clone());
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_credential(user: &str, prefix: &str) -> NewCredential {
        NewCredential {
            user_id: UserId::new(user),
            name: format!("{user}-{prefix}"),
            key_prefix: prefix.to_string(),
            token_hash: "$argon2id$stub".to_string(),
            scopes: vec![],
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_prefix() {
        let store = MemoryTokenStore::new();
        store.create(new_credential("alice", "abcd1234")).await.unwrap();
        let err = store.create(new_credential("bob", "abcd1234")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner() {
        let store = MemoryTokenStore::new();
        store.create(new_credential("alice", "aaaa0001")).await.unwrap();
        store.create(new_credential("alice", "aaaa0002")).await.unwrap();
        store.create(new_credential("bob", "bbbb0001")).await.unwrap();

        let alice = store.list_by_user(&UserId::new("alice")).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.user_id.as_str() == "alice"));
    }

    #[tokio::test]
    async fn touch_updates_last_used() {
        let store = MemoryTokenStore::new();
        let record = store.create(new_credential("alice", "aaaa0001")).await.unwrap();
        assert!(record.last_used_at.is_none());

        let now = Utc::now();
        store.touch_last_used(record.id, now).await.unwrap();
        let reloaded = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_used_at, Some(now));
    }

    #[tokio::test]
    async fn static_sessions_resolve_exact_tokens_only() {
        let sessions = StaticSessionIdentity::new().with_session("s3cr3t", "alice");
        assert_eq!(
            sessions.resolve("s3cr3t").await.unwrap(),
            Some(UserId::new("alice"))
        );
        assert_eq!(sessions.resolve("s3cr3").await.unwrap(), None);
        assert_eq!(sessions.resolve("").await.unwrap(), None);
    }
}
