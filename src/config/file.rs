//! TOML configuration file loading
//!
//! Supports `~/.config/studio/chat.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ChatConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingFileConfig,

    /// Completion provider configuration
    #[serde(default)]
    pub completion: CompletionFileConfig,

    /// Broadcast configuration
    #[serde(default)]
    pub broadcast: BroadcastFileConfig,

    /// Prompt assembly budget and deadlines
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Bot ids used by the bot-builder prompt chains
    #[serde(default)]
    pub builder: BuilderFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// `SQLite` database path
    pub database: Option<String>,
}

/// Embedding provider configuration
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Completion provider configuration
#[derive(Debug, Default, Deserialize)]
pub struct CompletionFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Default response length cap
    pub max_tokens: Option<u32>,
    /// Request model name → provider model id
    #[serde(default)]
    pub models: HashMap<String, String>,
}

/// Broadcast configuration
#[derive(Debug, Default, Deserialize)]
pub struct BroadcastFileConfig {
    /// `local` or `realtime`
    pub mode: Option<String>,
    /// Supabase project URL for realtime mode
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Prompt assembly budget and deadlines
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Model context window in tokens
    pub context_window: Option<usize>,
    /// Max history rows fetched per request
    pub history_limit: Option<usize>,
    /// Per-bot similarity search deadline
    pub search_timeout_secs: Option<u64>,
    /// Max wait for the next streamed part
    pub stream_timeout_secs: Option<u64>,
}

/// Bot ids used by the bot-builder prompt chains
#[derive(Debug, Default, Deserialize)]
pub struct BuilderFileConfig {
    pub prompt_bot_id: Option<String>,
    pub parser_bot_id: Option<String>,
    pub refiner_bot_id: Option<String>,
    pub links_bot_id: Option<String>,
    pub insight_bot_id: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ChatConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ChatConfigFile {
    let Some(path) = config_file_path() else {
        return ChatConfigFile::default();
    };

    if !path.exists() {
        return ChatConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ChatConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ChatConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/studio/chat.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("studio").join("chat.toml"))
}
