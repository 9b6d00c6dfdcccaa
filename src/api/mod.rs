//! HTTP API server for the chat pipeline

pub mod bot_builder;
pub mod health;
pub mod stream;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::builder::BuilderBots;
use crate::chat::ChatService;
use crate::db::DbPool;
use crate::relay::LocalBroadcaster;
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub chat: Arc<ChatService>,
    pub builder_bots: BuilderBots,
    /// In-process hub served over SSE; `None` when events go to an external service
    pub local_hub: Option<LocalBroadcaster>,
    /// Database checked by the readiness probe
    pub db: Option<DbPool>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Pipeline error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn code(&self) -> &'static str {
        match self.0 {
            Error::Validation(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::Database(_) | Error::Sqlite(_) => "db_error",
            Error::Embedding(_) => "embedding_error",
            Error::Completion(_) | Error::Stream(_) => "completion_error",
            Error::Config(_) => "config_error",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            tracing::error!(error = %self.0, "request failed");
            "internal server error".to_string()
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    chat: Arc<ChatService>,
    port: u16,
    builder_bots: BuilderBots,
    local_hub: Option<LocalBroadcaster>,
    db: Option<DbPool>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(chat: Arc<ChatService>, port: u16) -> Self {
        Self {
            chat,
            port,
            builder_bots: BuilderBots::default(),
            local_hub: None,
            db: None,
        }
    }

    /// Set the bots used by the builder chains
    #[must_use]
    pub fn builder_bots(mut self, bots: BuilderBots) -> Self {
        self.builder_bots = bots;
        self
    }

    /// Serve the in-process broadcast hub over SSE
    #[must_use]
    pub fn local_hub(mut self, hub: LocalBroadcaster) -> Self {
        self.local_hub = Some(hub);
        self
    }

    /// Set the database for readiness checks
    #[must_use]
    pub fn db(mut self, db: DbPool) -> Self {
        self.db = Some(db);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(ApiState {
                chat: self.chat,
                builder_bots: self.builder_bots,
                local_hub: self.local_hub,
                db: self.db,
            }),
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api/bot-builder", bot_builder::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        if let Some(hub) = &self.state.local_hub {
            router = router.nest("/api/stream", stream::router(hub.clone()));
        }

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, sse = self.state.local_hub.is_some(), "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
