//! Configuration objects, loaded from environment variables.
//!
//! Each component receives its config at construction; nothing reads the
//! environment after startup.

use std::str::FromStr;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{KgRagError, Result};

/// Load a `.env` file into the process environment, if one exists.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Graph store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    /// Neo4j connection URI (e.g. `bolt://localhost:7687`).
    #[validate(length(min = 1))]
    pub uri: String,

    /// Neo4j username.
    #[validate(length(min = 1))]
    pub user: String,

    /// Neo4j password.
    pub password: String,

    /// Connection pool size.
    #[validate(range(min = 1))]
    pub max_connections: usize,

    /// `batchSize` handed to `apoc.import.graphml`.
    #[validate(range(min = 1))]
    pub import_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            max_connections: 8,
            import_batch_size: 10_000,
        }
    }
}

impl StoreConfig {
    /// Read `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`, `NEO4J_MAX_CONNECTIONS`
    /// and `IMPORT_BATCH_SIZE`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            uri: env_or("NEO4J_URI", defaults.uri),
            user: env_or("NEO4J_USER", defaults.user),
            password: env_or("NEO4J_PASSWORD", defaults.password),
            max_connections: parse_env("NEO4J_MAX_CONNECTIONS", defaults.max_connections)?,
            import_batch_size: parse_env("IMPORT_BATCH_SIZE", defaults.import_batch_size)?,
        };

        config
            .validate()
            .map_err(|e| KgRagError::Config(e.to_string()))?;
        Ok(config)
    }
}

/// LLM service settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LlmConfig {
    /// OpenAI API key.
    #[validate(length(min = 1))]
    pub api_key: String,

    /// Base URL of an OpenAI-compatible API; `None` uses the OpenAI default.
    pub api_base: Option<String>,

    /// Chat model name.
    #[validate(length(min = 1))]
    pub model_name: String,

    /// Response cache capacity; `0` disables caching.
    pub cache_capacity: u64,
}

impl LlmConfig {
    /// Read `OPENAI_API_KEY` (required), `OPENAI_API_BASE`, `MODEL_NAME` and
    /// `LLM_CACHE_CAPACITY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| KgRagError::Config("OPENAI_API_KEY is required".to_string()))?;

        let config = Self {
            api_key,
            api_base: std::env::var("OPENAI_API_BASE").ok().filter(|b| !b.is_empty()),
            model_name: env_or("MODEL_NAME", "gpt-4o".to_string()),
            cache_capacity: parse_env("LLM_CACHE_CAPACITY", 1_000)?,
        };

        config
            .validate()
            .map_err(|e| KgRagError::Config(e.to_string()))?;
        Ok(config)
    }
}

/// Exponential-backoff bounds for transient service errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total time budget for retries; the last error is returned once exceeded.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Read `RETRY_MAX_ELAPSED_SECS`; `0` disables retries.
    pub fn from_env() -> Result<Self> {
        let secs = parse_env("RETRY_MAX_ELAPSED_SECS", 120u64)?;
        Ok(Self {
            max_elapsed: Duration::from_secs(secs),
            ..Self::default()
        })
    }

    /// No retries: the first transient error is returned as-is.
    pub fn none() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            max_elapsed: Duration::ZERO,
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

/// Execution knobs for the query pipelines.
#[derive(Debug, Clone, Validate)]
pub struct RetrievalOptions {
    /// Windows scored concurrently.
    #[validate(range(min = 1))]
    pub max_concurrency: usize,

    /// Timeout applied to each store or LLM call.
    pub call_timeout: Duration,

    /// Upper bound on the number of windows one query may generate.
    #[validate(range(min = 1))]
    pub max_windows: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            call_timeout: Duration::from_secs(60),
            max_windows: 10_000,
        }
    }
}

impl RetrievalOptions {
    /// Read `MAX_CONCURRENCY` and `REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", defaults.call_timeout.as_secs())?;
        if timeout_secs == 0 {
            return Err(KgRagError::Config(
                "REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        let options = Self {
            max_concurrency: parse_env("MAX_CONCURRENCY", defaults.max_concurrency)?,
            call_timeout: Duration::from_secs(timeout_secs),
            max_windows: defaults.max_windows,
        };

        options
            .validate()
            .map_err(|e| KgRagError::Config(e.to_string()))?;
        Ok(options)
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| KgRagError::Config(format!("Invalid {name} '{val}': {e}"))),
        Err(_) => Ok(default),
    }
}
