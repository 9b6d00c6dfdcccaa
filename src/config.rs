//! Configuration management for the chat pipeline
//!
//! Precedence: environment > `~/.config/studio/chat.toml` > defaults.
//! Loaded once at startup; everything here is read-only afterwards.

pub mod file;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::builder::BuilderBots;
use crate::embedding::{DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL};
use crate::{Error, Result};

/// Context window assumed when none is configured
pub const DEFAULT_CONTEXT_WINDOW: usize = 8192;

/// Max history rows fetched per request
pub const DEFAULT_HISTORY_LIMIT: usize = 40;

/// Default completion endpoint (OpenAI-compatible)
pub const DEFAULT_COMPLETION_URL: &str = "https://api.together.xyz/v1";

/// Default model requested by the bot builder
pub const DEFAULT_MODEL: &str = "mixtral";

/// Token budget derived from the model context window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Model context window
    pub context_window: usize,
    /// Prompt budget: 80% of the window, the rest is left for the response
    pub total_allowed: usize,
    /// History sub-budget: 60% of the prompt budget
    pub history_allowed: usize,
}

impl TokenBudget {
    /// Derive the budget from a context window (all values floored)
    #[must_use]
    pub const fn from_context_window(context_window: usize) -> Self {
        let total_allowed = context_window * 8 / 10;
        Self {
            context_window,
            total_allowed,
            history_allowed: total_allowed * 6 / 10,
        }
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::from_context_window(DEFAULT_CONTEXT_WINDOW)
    }
}

/// Immutable per-process settings for prompt assembly and streaming
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub budget: TokenBudget,
    /// Max history rows fetched per request
    pub history_limit: usize,
    /// Deadline for each bot's similarity search
    pub search_timeout: Duration,
    /// Max wait for the next part of a completion stream
    pub stream_idle_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            budget: TokenBudget::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            search_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
}

/// Embedding provider configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

/// Completion provider configuration
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Response length cap applied when a request does not set one
    pub max_tokens: Option<u32>,
    /// Request model name → provider model id
    pub models: HashMap<String, String>,
}

/// Where stream events are published
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BroadcastConfig {
    /// In-process hub, consumable over SSE
    #[default]
    Local,
    /// Supabase Realtime broadcast REST API
    Realtime { url: String, api_key: String },
}

/// Chat pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// `SQLite` database path
    pub database_path: PathBuf,

    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    pub broadcast: BroadcastConfig,
    pub pipeline: PipelineSettings,
    pub builder: BuilderBots,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::from_file_config(file::load_config_file())
    }

    /// Build configuration from a parsed config file, with environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_file_config(fc: file::ChatConfigFile) -> Result<Self> {
        // Determine data directory (~/.local/share/studio on Linux)
        let data_dir = directories::BaseDirs::new()
            .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("studio"));

        let database_path = env("STUDIO_DB_PATH")
            .or(fc.server.database)
            .map_or_else(|| data_dir.join("chat.db"), PathBuf::from);

        let server = ServerConfig {
            port: parse_env("STUDIO_PORT")?
                .or(parse_env("PORT")?)
                .or(fc.server.port)
                .unwrap_or(8787),
        };

        let embedding = EmbeddingConfig {
            base_url: env("EMBEDDING_API_URL")
                .or(fc.embedding.url)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
            model: env("EMBEDDING_MODEL")
                .or(fc.embedding.model)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            api_key: env("EMBEDDING_API_KEY")
                .or_else(|| env("JINA_API_KEY"))
                .or(fc.embedding.api_key),
        };

        let mut models = default_model_aliases();
        models.extend(fc.completion.models);
        let completion = CompletionConfig {
            base_url: env("COMPLETION_API_URL")
                .or(fc.completion.url)
                .unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_string()),
            api_key: env("COMPLETION_API_KEY").or(fc.completion.api_key),
            max_tokens: parse_env("COMPLETION_MAX_TOKENS")?.or(fc.completion.max_tokens),
            models,
        };

        let broadcast = Self::broadcast_config(fc.broadcast)?;

        let defaults = PipelineSettings::default();
        let context_window = parse_env("STUDIO_CONTEXT_WINDOW")?
            .or(fc.pipeline.context_window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);
        let pipeline = PipelineSettings {
            budget: TokenBudget::from_context_window(context_window),
            history_limit: parse_env("STUDIO_HISTORY_LIMIT")?
                .or(fc.pipeline.history_limit)
                .unwrap_or(defaults.history_limit),
            search_timeout: parse_env("STUDIO_SEARCH_TIMEOUT_SECS")?
                .or(fc.pipeline.search_timeout_secs)
                .map_or(defaults.search_timeout, Duration::from_secs),
            stream_idle_timeout: parse_env("STUDIO_STREAM_TIMEOUT_SECS")?
                .or(fc.pipeline.stream_timeout_secs)
                .map_or(defaults.stream_idle_timeout, Duration::from_secs),
        };

        let builder = BuilderBots {
            prompt_bot_id: env("BUILDER_PROMPT_BOT_ID").or(fc.builder.prompt_bot_id),
            parser_bot_id: env("BUILDER_PARSER_BOT_ID").or(fc.builder.parser_bot_id),
            refiner_bot_id: env("BUILDER_REFINER_BOT_ID").or(fc.builder.refiner_bot_id),
            links_bot_id: env("BUILDER_LINKS_BOT_ID").or(fc.builder.links_bot_id),
            insight_bot_id: env("BUILDER_INSIGHT_BOT_ID").or(fc.builder.insight_bot_id),
        };

        tracing::debug!(
            context_window,
            total_allowed = pipeline.budget.total_allowed,
            history_allowed = pipeline.budget.history_allowed,
            "token budget configured"
        );

        Ok(Self {
            data_dir,
            database_path,
            server,
            embedding,
            completion,
            broadcast,
            pipeline,
            builder,
        })
    }

    fn broadcast_config(fc: file::BroadcastFileConfig) -> Result<BroadcastConfig> {
        let mode = env("STUDIO_BROADCAST")
            .or(fc.mode)
            .unwrap_or_else(|| "local".to_string());

        match mode.to_lowercase().as_str() {
            "local" => Ok(BroadcastConfig::Local),
            "realtime" | "supabase" => {
                let url = env("SUPABASE_URL").or(fc.url).ok_or_else(|| {
                    Error::Config("SUPABASE_URL required for realtime broadcast".to_string())
                })?;
                let api_key = env("SUPABASE_ANON_KEY").or(fc.api_key).ok_or_else(|| {
                    Error::Config("SUPABASE_ANON_KEY required for realtime broadcast".to_string())
                })?;
                Ok(BroadcastConfig::Realtime { url, api_key })
            }
            other => Err(Error::Config(format!("unknown broadcast mode: {other}"))),
        }
    }
}

/// Provider model ids for the short names clients send
fn default_model_aliases() -> HashMap<String, String> {
    HashMap::from([(
        "mixtral".to_string(),
        "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
    )])
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    env(key)
        .map(|v| {
            v.parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {v}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_matches_8k_window() {
        let budget = TokenBudget::default();
        assert_eq!(budget.context_window, 8192);
        assert_eq!(budget.total_allowed, 6553);
        assert_eq!(budget.history_allowed, 3931);
    }

    #[test]
    fn budget_floors_fractions() {
        let budget = TokenBudget::from_context_window(100);
        assert_eq!(budget.total_allowed, 80);
        assert_eq!(budget.history_allowed, 48);

        let budget = TokenBudget::from_context_window(7);
        assert_eq!(budget.total_allowed, 5);
        assert_eq!(budget.history_allowed, 3);
    }

    #[test]
    fn pipeline_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.history_limit, 40);
        assert_eq!(settings.search_timeout, Duration::from_secs(10));
    }

    #[test]
    fn mixtral_alias_is_built_in() {
        let models = default_model_aliases();
        assert!(models["mixtral"].contains("Mixtral"));
    }
}
