//! MCP credential issuance and verification.
//!
//! A token is `MCP-<prefix>_<secret>`. The prefix is public and indexed for
//! lookup; only an Argon2id hash of the secret is persisted. Hashing and
//! verification are CPU-heavy by construction and always run on the blocking
//! pool.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::models::UserId;
use crate::store::{CredentialRecord, NewCredential, StoreError, TokenStore};

pub const TOKEN_MARKER: &str = "MCP-";

const PREFIX_BYTES: usize = 6;
const SECRET_BYTES: usize = 32;
const PREFIX_ATTEMPTS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("credential not found")]
    NotFound,

    #[error("credential belongs to another user")]
    Forbidden,
}

// ── Hashing ─────────────────────────────────────────────────────────────────

/// Argon2id hasher with a fixed cost. Holds a dummy hash of the same cost so
/// a lookup miss can burn the same CPU as a wrong secret.
#[derive(Clone)]
pub struct SecretHasher {
    argon: Argon2<'static>,
    dummy_hash: Arc<str>,
}

impl SecretHasher {
    pub fn with_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, CredentialError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| CredentialError::Crypto(format!("invalid argon2 params: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let filler = URL_SAFE_NO_PAD.encode(random_bytes::<SECRET_BYTES>()?);
        let dummy_hash = hash_with(&argon, &filler)?;

        Ok(Self {
            argon,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    pub async fn hash(&self, secret: String) -> Result<String, CredentialError> {
        let argon = self.argon.clone();
        tokio::task::spawn_blocking(move || hash_with(&argon, &secret))
            .await
            .map_err(|e| CredentialError::Crypto(format!("hash task failed: {e}")))?
    }

    /// `false` on mismatch or an unparseable stored hash.
    pub async fn verify(&self, secret: String, stored_hash: String) -> bool {
        let argon = self.argon.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            match PasswordHash::new(&stored_hash) {
                Ok(parsed) => argon.verify_password(secret.as_bytes(), &parsed).is_ok(),
                Err(e) => {
                    tracing::warn!("stored token hash is not a valid PHC string: {}", e);
                    false
                }
            }
        })
        .await;

        match outcome {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!("verify task failed: {}", e);
                false
            }
        }
    }

    /// Verifies against the dummy hash and discards the result.
    pub async fn burn(&self, secret: String) {
        let _ = self.verify(secret, self.dummy_hash.to_string()).await;
    }
}

fn hash_with(argon: &Argon2<'_>, secret: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut SaltRng);
    argon
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CredentialError::Crypto(format!("hash failed: {e}")))
}

// ── Token material ──────────────────────────────────────────────────────────

fn random_bytes<const N: usize>() -> Result<[u8; N], CredentialError> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CredentialError::Crypto(format!("random source failed: {e}")))?;
    Ok(buf)
}

/// Base64url prefix free of `_`, so the first `_` in a token always marks the
/// prefix/secret boundary.
fn generate_prefix() -> Result<String, CredentialError> {
    for _ in 0..PREFIX_ATTEMPTS {
        let prefix = URL_SAFE_NO_PAD.encode(random_bytes::<PREFIX_BYTES>()?);
        if !prefix.contains('_') {
            return Ok(prefix);
        }
    }
    Err(CredentialError::Crypto("could not generate a token prefix".into()))
}

fn generate_secret() -> Result<String, CredentialError> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<SECRET_BYTES>()?))
}

pub fn format_token(prefix: &str, secret: &str) -> String {
    format!("{TOKEN_MARKER}{prefix}_{secret}")
}

// ── Service ─────────────────────────────────────────────────────────────────

/// The full token is only ever carried by this value.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub record: CredentialRecord,
}

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn TokenStore>,
    hasher: SecretHasher,
}

impl CredentialService {
    pub fn new(store: Arc<dyn TokenStore>, hasher: SecretHasher) -> Self {
        Self { store, hasher }
    }

    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub async fn issue(
        &self,
        principal: &UserId,
        name: String,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedCredential, CredentialError> {
        let prefix = generate_prefix()?;
        let secret = generate_secret()?;
        let token_hash = self.hasher.hash(secret.clone()).await?;

        let record = self
            .store
            .create(NewCredential {
                user_id: principal.clone(),
                name,
                key_prefix: prefix.clone(),
                token_hash,
                scopes,
                expires_at,
            })
            .await?;

        tracing::info!(
            user_id = %principal,
            token_id = %record.id,
            key_prefix = %record.key_prefix,
            "issued MCP token"
        );

        Ok(IssuedCredential {
            token: format_token(&prefix, &secret),
            record,
        })
    }

    pub async fn find_by_prefix(&self, prefix: &str) -> Result<CredentialRecord, CredentialError> {
        self.store
            .find_by_prefix(prefix)
            .await?
            .ok_or(CredentialError::NotFound)
    }

    pub async fn list_by_principal(&self, principal: &UserId) -> Result<Vec<CredentialRecord>, CredentialError> {
        Ok(self.store.list_by_user(principal).await?)
    }

    /// Ownership is checked before anything is removed.
    pub async fn delete(&self, id: Uuid, principal: &UserId) -> Result<(), CredentialError> {
        let record = self.store.find_by_id(id).await?.ok_or(CredentialError::NotFound)?;
        if &record.user_id != principal {
            tracing::warn!(user_id = %principal, token_id = %id, "refused to delete foreign MCP token");
            return Err(CredentialError::Forbidden);
        }
        if !self.store.delete(id).await? {
            return Err(CredentialError::NotFound);
        }
        tracing::info!(user_id = %principal, token_id = %id, "deleted MCP token");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;

    fn service() -> CredentialService {
        let hasher = SecretHasher::with_cost(8, 1, 1).unwrap();
        CredentialService::new(Arc::new(MemoryTokenStore::new()), hasher)
    }

    #[test]
    fn prefix_never_contains_separator() {
        for _ in 0..500 {
            let prefix = generate_prefix().unwrap();
            assert_eq!(prefix.len(), 8);
            assert!(!prefix.contains('_'));
        }
    }

    #[test]
    fn secret_is_43_url_safe_chars() {
        let secret = generate_secret().unwrap();
        assert_eq!(secret.len(), 43);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = SecretHasher::with_cost(8, 1, 1).unwrap();
        let hash = hasher.hash("correct horse".into()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse".into(), hash.clone()).await);
        assert!(!hasher.verify("correct hors3".into(), hash).await);
    }

    #[tokio::test]
    async fn verify_rejects_garbage_hash() {
        let hasher = SecretHasher::with_cost(8, 1, 1).unwrap();
        assert!(!hasher.verify("x".into(), "not-a-phc-string".into()).await);
    }

    #[tokio::test]
    async fn issue_stores_hash_not_secret() {
        let svc = service();
        let alice = UserId::new("alice");
        let issued = svc
            .issue(&alice, "laptop".into(), vec!["llm:summarize".into()], None)
            .await
            .unwrap();

        let rest = issued.token.strip_prefix(TOKEN_MARKER).unwrap();
        let (prefix, secret) = rest.split_once('_').unwrap();
        assert_eq!(prefix, issued.record.key_prefix);
        assert!(!issued.record.token_hash.contains(secret));

        let found = svc.find_by_prefix(prefix).await.unwrap();
        assert_eq!(found.id, issued.record.id);
        assert!(svc.hasher().verify(secret.to_string(), found.token_hash).await);
    }

    #[tokio::test]
    async fn two_issues_get_distinct_prefixes() {
        let svc = service();
        let alice = UserId::new("alice");
        let a = svc.issue(&alice, "a".into(), vec![], None).await.unwrap();
        let b = svc.issue(&alice, "b".into(), vec![], None).await.unwrap();
        assert_ne!(a.record.key_prefix, b.record.key_prefix);
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn delete_checks_ownership() {
        let svc = service();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let issued = svc.issue(&alice, "a".into(), vec![], None).await.unwrap();

        let err = svc.delete(issued.record.id, &bob).await.unwrap_err();
        assert!(matches!(err, CredentialError::Forbidden));
        assert!(svc.find_by_prefix(&issued.record.key_prefix).await.is_ok());

        svc.delete(issued.record.id, &alice).await.unwrap();
        assert!(matches!(
            svc.find_by_prefix(&issued.record.key_prefix).await,
            Err(CredentialError::NotFound)
        ));
        assert!(matches!(
            svc.delete(issued.record.id, &alice).await,
            Err(CredentialError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_is_owner_scoped() {
        let svc = service();
        let alice = UserId::new("alice");
        svc.issue(&alice, "a".into(), vec![], None).await.unwrap();
        svc.issue(&UserId::new("bob"), "b".into(), vec![], None).await.unwrap();
        let listed = svc.list_by_principal(&alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a");
    }
}
