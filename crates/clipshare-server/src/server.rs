use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::client::{self, Heartbeat};
use crate::config::ServerConfig;
use crate::connection::ClientConnection;
use crate::controller::SessionController;
use crate::health;
use crate::http;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Room above the upload ceiling for multipart framing.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub heartbeat: Heartbeat,
    pub send_queue_capacity: usize,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &ServerConfig, registry: Arc<SessionRegistry>, shutdown: CancellationToken) -> Self {
        Self {
            controller: SessionController::new(registry, config.max_upload_bytes),
            heartbeat: Heartbeat {
                interval: config.heartbeat_interval(),
                timeout: config.client_timeout(),
            },
            send_queue_capacity: config.send_queue_capacity,
            started_at: Instant::now(),
            shutdown,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.controller.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/clipboard", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/session/join", post(http::join_session))
        .route("/api/session/code", get(http::generate_code))
        .route("/api/upload/{code}", post(http::upload_file))
        .route("/api/download/{code}/{file_id}", get(http::download_file))
        .route("/api/file/{code}/{file_id}", get(http::preview_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let registry = SessionRegistry::new(config.idle_timeout());
    let coordinator = ShutdownCoordinator::new();
    let state = AppState::new(&config, Arc::clone(&registry), coordinator.token());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    info!(
        %addr,
        idle_timeout_secs = config.idle_timeout_secs,
        max_upload_bytes = config.max_upload_bytes,
        "clipshare server started"
    );

    let token = coordinator.token();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        addr,
        registry,
        coordinator,
        server,
    })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    pub addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    coordinator: ShutdownCoordinator,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting, end every session and connection, and wait for the
    /// listener to drain.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        info!("shutting down");
        // The registry refuses new sessions before the token stops the
        // sockets, so members still receive the shutdown notice.
        self.registry.shutdown();
        self.coordinator
            .graceful_shutdown(vec![self.server], timeout)
            .await;
        info!("shutdown complete");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, rx) = ClientConnection::channel(state.send_queue_capacity);
    client::handle_ws_connection(
        socket,
        connection,
        rx,
        state.controller,
        state.heartbeat,
        state.shutdown,
    )
    .await;
}

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(health::registry_health(
        state.started_at,
        state.controller.registry(),
    ))
}
