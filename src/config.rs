// Process configuration, read once from the environment at startup.

use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_PORT: u16 = 8090;
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openrouter/auto";
pub const DEFAULT_API_KEY_VAR: &str = "OPENROUTER_API_KEY";

/// Upstream chat API settings. The API key itself is never stored here; it is
/// resolved on each call through [`crate::llm::ApiKeySource`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub default_model: String,
    pub sync_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub app_title: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            sync_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(60),
            app_title: "fm-rss-reader".to_string(),
        }
    }
}

/// Argon2 cost for MCP token secrets.
#[derive(Debug, Clone, Copy)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub llm: LlmConfig,
    pub hash_cost: HashCost,
    pub cors_origins: Vec<String>,
    /// Static session for dev mode: `(token, user_id)`.
    pub dev_session: Option<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            llm: LlmConfig::default(),
            hash_cost: HashCost::default(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            dev_session: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let llm = LlmConfig {
            base_url: env_string("OPENROUTER_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.llm.base_url),
            default_model: env_string("LLM_DEFAULT_MODEL").unwrap_or(defaults.llm.default_model),
            sync_timeout: env_parse::<u64>("LLM_SYNC_TIMEOUT_SECS")?
                .map_or(defaults.llm.sync_timeout, Duration::from_secs),
            stream_idle_timeout: env_parse::<u64>("LLM_STREAM_IDLE_TIMEOUT_SECS")?
                .map_or(defaults.llm.stream_idle_timeout, Duration::from_secs),
            app_title: env_string("LLM_APP_TITLE").unwrap_or(defaults.llm.app_title),
        };

        let hash_cost = HashCost {
            memory_kib: env_parse("MCP_HASH_MEMORY_KIB")?.unwrap_or(defaults.hash_cost.memory_kib),
            iterations: env_parse("MCP_HASH_ITERATIONS")?.unwrap_or(defaults.hash_cost.iterations),
            parallelism: env_parse("MCP_HASH_PARALLELISM")?.unwrap_or(defaults.hash_cost.parallelism),
        };

        let cors_origins = env_string("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        let dev_session = match (env_string("DEV_SESSION_TOKEN"), env_string("DEV_USER_ID")) {
            (Some(token), Some(user)) => Some((token, user)),
            (Some(token), None) => Some((token, "dev".to_string())),
            _ => None,
        };

        Ok(Self {
            port: env_parse("PORT")?.unwrap_or(defaults.port),
            database_url: env_string("DATABASE_URL"),
            llm,
            hash_cost,
            cors_origins,
            dev_session,
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(key).map(|raw| parse_value(key, &raw)).transpose()
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim().parse::<T>().with_context(|| format!("invalid {key}: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8090);
        assert_eq!(cfg.llm.default_model, "openrouter/auto");
        assert_eq!(cfg.llm.sync_timeout, Duration::from_secs(120));
        assert_eq!(cfg.llm.stream_idle_timeout, Duration::from_secs(60));
        assert_eq!(cfg.hash_cost.memory_kib, 19_456);
        assert!(cfg.dev_session.is_none());
    }

    #[test]
    fn unset_variable_parses_to_none() {
        assert!(env_parse::<u16>("FM_RSS_TEST_UNSET_VARIABLE").unwrap().is_none());
    }

    #[test]
    fn bad_numbers_are_reported_with_the_variable_name() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert!(parse_value::<u16>("PORT", "70000").is_err());
        assert_eq!(parse_value::<u16>("PORT", " 8091 ").unwrap(), 8091);
    }
}
