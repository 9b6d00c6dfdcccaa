//! Daemon - wires configuration into a running chat service
//!
//! Opens the database, builds the embedding and completion providers and picks the
//! broadcaster, then serves the HTTP API.

use std::sync::Arc;

use crate::api::ApiServerBuilder;
use crate::chat::{ChatService, Collaborators};
use crate::completion::OpenAiCompatibleProvider;
use crate::config::BroadcastConfig;
use crate::db::{self, BotRepo, ConversationRepo, DbPool, DocumentRepo, MessageRepo, ModuleSetRepo};
use crate::embedding::HttpEmbedder;
use crate::relay::{Broadcaster, LocalBroadcaster, RealtimeBroadcaster};
use crate::{Config, Error, Result};

/// The chat daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
    chat: Arc<ChatService>,
    local_hub: Option<LocalBroadcaster>,
}

impl Daemon {
    /// Create a daemon from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or a provider key is missing
    pub fn new(config: Config) -> Result<Self> {
        let db = db::init(&config.database_path)?;

        let embedding_key = config.embedding.api_key.clone().ok_or_else(|| {
            Error::Config("EMBEDDING_API_KEY or JINA_API_KEY must be set".to_string())
        })?;
        let embedder = HttpEmbedder::with_endpoint(
            config.embedding.base_url.clone(),
            embedding_key,
            config.embedding.model.clone(),
        )?;

        let completion_key = config
            .completion
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("COMPLETION_API_KEY must be set".to_string()))?;
        let completions =
            OpenAiCompatibleProvider::new(&config.completion.base_url, completion_key)?
                .with_models(config.completion.models.clone());

        let (broadcaster, local_hub): (Arc<dyn Broadcaster>, _) = match &config.broadcast {
            BroadcastConfig::Local => {
                let hub = LocalBroadcaster::new();
                (Arc::new(hub.clone()), Some(hub))
            }
            BroadcastConfig::Realtime { url, api_key } => {
                (Arc::new(RealtimeBroadcaster::new(url, api_key.clone())?), None)
            }
        };

        let collaborators = Collaborators {
            bots: Arc::new(BotRepo::new(db.clone())),
            conversations: Arc::new(ConversationRepo::new(db.clone())),
            messages: Arc::new(MessageRepo::new(db.clone())),
            module_sets: Arc::new(ModuleSetRepo::new(db.clone())),
            documents: Arc::new(DocumentRepo::new(db.clone())),
            embedder: Arc::new(embedder),
            completions: Arc::new(completions),
            broadcaster,
        };

        let chat = ChatService::new(collaborators, config.pipeline.clone())
            .with_default_max_tokens(config.completion.max_tokens);

        tracing::info!(
            database = %config.database_path.display(),
            completion_url = %config.completion.base_url,
            broadcast = ?config.broadcast,
            "daemon initialized"
        );

        Ok(Self {
            config,
            db,
            chat: Arc::new(chat),
            local_hub,
        })
    }

    /// The chat service
    #[must_use]
    pub fn chat(&self) -> Arc<ChatService> {
        Arc::clone(&self.chat)
    }

    /// The in-process hub, when broadcasting locally
    #[must_use]
    pub const fn local_hub(&self) -> Option<&LocalBroadcaster> {
        self.local_hub.as_ref()
    }

    /// Serve the HTTP API until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self, port: Option<u16>) -> Result<()> {
        let port = port.unwrap_or(self.config.server.port);

        let mut builder = ApiServerBuilder::new(self.chat, port)
            .builder_bots(self.config.builder.clone())
            .db(self.db);
        if let Some(hub) = self.local_hub {
            builder = builder.local_hub(hub);
        }

        let server = builder.build().spawn();

        tokio::select! {
            result = server => {
                result.map_err(|e| Error::Config(format!("API server task failed: {e}")))??;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
            }
        }

        Ok(())
    }
}
