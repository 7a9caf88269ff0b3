use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use switchboard_engine::Orchestrator;
use switchboard_settings::ServerSettings;

use crate::handlers;
use crate::sink::BroadcastSink;

/// How long a graceful shutdown may wait for open connections.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            broadcast_capacity: settings.broadcast_capacity,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub sink: BroadcastSink,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(handlers::ws_handler))
        .route("/hooks/permission", post(handlers::permission_hook))
        .route(
            "/channels/{channel_id}",
            get(handlers::channel_state).delete(handlers::reset_channel),
        )
        .route("/channels/{channel_id}/messages", post(handlers::post_message))
        .route("/channels/{channel_id}/stop", post(handlers::stop_channel))
        .route("/approvals", get(handlers::list_approvals))
        .route("/approvals/{request_id}", post(handlers::resolve_approval))
        .route("/approvals/notice/{notice_key}", post(handlers::resolve_notice))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns a handle to shut it down.
pub async fn start(config: &ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "server stopped with an error");
        }
    });

    tracing::info!(%addr, "switchboard server started");
    Ok(ServerHandle {
        port: addr.port(),
        addr,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait briefly for open ones.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let mut server = self.server;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            tracing::warn!("connections still open after grace period, aborting");
            server.abort();
        }
    }
}
