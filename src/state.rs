// Application state shared by every handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::auth::SessionIdentity;
use crate::config::Config;
use crate::credentials::{CredentialService, SecretHasher};
use crate::llm::{ApiKeySource, LlmClient};
use crate::mcp::auth::McpAuthenticator;
use crate::mcp::tools::ToolRegistry;
use crate::store::TokenStore;

const MODEL_CACHE_TTL: Duration = Duration::from_secs(60);

// ── Model list cache ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ModelCache {
    pub models: Vec<String>,
    pub fetched_at: Option<Instant>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh and non-empty; an empty list is always refetched.
    pub fn fresh(&self) -> Option<&[String]> {
        match self.fetched_at {
            Some(t) if t.elapsed() <= MODEL_CACHE_TTL && !self.models.is_empty() => Some(&self.models),
            _ => None,
        }
    }

    pub fn store(&mut self, models: Vec<String>) {
        self.models = models;
        self.fetched_at = Some(Instant::now());
    }
}

// ── AppState ────────────────────────────────────────────────────────────────

/// Cheap to clone; every field is an `Arc` or an `Arc`-backed handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: CredentialService,
    pub mcp_auth: McpAuthenticator,
    pub sessions: Arc<dyn SessionIdentity>,
    pub llm: LlmClient,
    pub tools: Arc<ToolRegistry>,
    pub model_cache: Arc<RwLock<ModelCache>>,
    pub start_time: Instant,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn TokenStore>,
        sessions: Arc<dyn SessionIdentity>,
        api_key: ApiKeySource,
    ) -> anyhow::Result<Self> {
        let cost = config.hash_cost;
        let hasher = SecretHasher::with_cost(cost.memory_kib, cost.iterations, cost.parallelism)?;
        let credentials = CredentialService::new(store, hasher);
        let llm = LlmClient::new(&config.llm, api_key)?;
        let tools = ToolRegistry::new()?;

        tracing::info!(
            base_url = %config.llm.base_url,
            default_model = %config.llm.default_model,
            "AppState initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            mcp_auth: McpAuthenticator::new(credentials.clone()),
            credentials,
            sessions,
            llm,
            tools: Arc::new(tools),
            model_cache: Arc::new(RwLock::new(ModelCache::new())),
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("Backend marked as READY");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_is_never_fresh() {
        let mut cache = ModelCache::new();
        assert!(cache.fresh().is_none());
        cache.store(vec![]);
        assert!(cache.fresh().is_none());
        cache.store(vec!["openrouter/auto".into()]);
        assert_eq!(cache.fresh().unwrap(), ["openrouter/auto".to_string()]);
    }
}
