//! Studio Chat - completion pipeline for bot-builder conversations
//!
//! This library assembles a bounded prompt for each user turn and streams the
//! model's answer back over a pub/sub channel:
//! - History windowing under a token budget
//! - Document retrieval across a conversation's module set
//! - Prompt composition and budget fitting
//! - Streamed completions relayed as `start` / `token` / `end` events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            HTTP API  │  CLI  │  Builder chains       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Chat service                        │
//! │   History  │  Retrieval  │  Prompt  │  Relay         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   SQLite  │  Embeddings  │  Completions  │  Realtime │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod builder;
pub mod chat;
pub mod completion;
pub mod config;
pub mod context;
pub mod daemon;
pub mod db;
pub mod embedding;
pub mod error;
pub mod prompt;
pub mod relay;
pub mod store;
pub mod tokens;
pub mod turn;

pub use builder::{BotBuilder, BuilderBots, BuilderSession};
pub use chat::{BotBuilderRequest, BotBuilderResponse, ChatService, Collaborators, CompletionRequest};
pub use completion::{CompletionOptions, CompletionProvider, CompletionStreamer, DeltaSink, StreamPart};
pub use config::{Config, PipelineSettings, TokenBudget};
pub use context::{BuiltContext, ContextBuilder};
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use embedding::{EmbeddingProvider, HttpEmbedder};
pub use error::{Error, Result};
pub use relay::{BroadcastChannel, Broadcaster, LocalBroadcaster, RealtimeBroadcaster, StreamEvent};
pub use turn::{Role, Turn};
