//! HTTP control server

use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::protocol::{ChatMessage, SessionUpdate};
use crate::session::SessionHandle;
use crate::ui::{handlers, websocket::ws_handler};

/// Conversation seen by this process, oldest first
#[derive(Default)]
pub struct MessageLog {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MessageLog {
    pub fn push(&self, message: ChatMessage) {
        self.messages.lock().push(message);
    }

    pub fn all(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }
}

/// Shared state for handlers
pub struct AppState {
    pub session: SessionHandle,
    pub messages: MessageLog,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            messages: MessageLog::default(),
            started_at: Instant::now(),
        }
    }
}

/// Build the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/messages", get(handlers::get_messages))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/config", get(handlers::get_config).put(handlers::update_config))
        .route("/api/stream/start", post(handlers::start_stream))
        .route("/api/stream/stop", post(handlers::stop_stream))
        .route("/api/text", post(handlers::send_text))
        .route("/api/camera/toggle", post(handlers::toggle_camera))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Copy chat messages from the session into the log until the session ends
pub fn spawn_message_collector(state: Arc<AppState>) -> JoinHandle<()> {
    let mut updates = state.session.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(SessionUpdate::Message(message)) => state.messages.push(message),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Message log lagged by {} updates", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Web server for the control API
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, session: SessionHandle) -> Self {
        Self {
            config,
            state: Arc::new(AppState::new(session)),
        }
    }

    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid UI bind address: {}", e)))
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.address()?;
        let collector = spawn_message_collector(self.state.clone());
        let router = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        let result = axum::serve(listener, router).await;
        collector.abort();
        result.map_err(Error::from)
    }

    /// Run on a background task
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Web server error: {}", e);
            }
        })
    }
}
