//! `TetherServer`: Axum HTTP server hosting long-poll sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use tether_channel::ChannelTimeouts;
use tether_session::{Addressable, SessionRegistry};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::transport;

/// Builds the root object (id 0) of every new session.
pub type RootFactory = Arc<dyn Fn() -> Arc<dyn Addressable> + Send + Sync>;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Index of activated sessions.
    pub sessions: SessionRegistry,
    /// Root object factory for new sessions.
    pub root_factory: RootFactory,
    /// Channel timers for new sessions.
    pub timeouts: ChannelTimeouts,
    /// Location the transport URLs are built under.
    pub mount_path: Arc<str>,
    /// When the server started.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
}

/// The main tether server.
pub struct TetherServer {
    config: ServerConfig,
    sessions: SessionRegistry,
    root_factory: RootFactory,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl TetherServer {
    /// Create a server whose sessions are rooted at objects built by `root_factory`.
    pub fn new<F>(config: ServerConfig, root_factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Addressable> + Send + Sync + 'static,
    {
        Self {
            config,
            sessions: SessionRegistry::new(),
            root_factory: Arc::new(root_factory),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let base = self.config.mount_base();
        let state = AppState {
            sessions: self.sessions.clone(),
            root_factory: Arc::clone(&self.root_factory),
            timeouts: self.config.timeouts,
            mount_path: Arc::from(base),
            start_time: self.start_time,
            started_at: self.started_at,
        };
        let bootstrap = if base.is_empty() { "/" } else { base };

        Router::new()
            .route("/health", get(health_handler))
            .route(bootstrap, post(transport::bootstrap))
            .route(&format!("{base}/{{client_id}}/input"), post(transport::input))
            .route(
                &format!("{base}/{{client_id}}/output"),
                get(transport::output).post(transport::output),
            )
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        Ok(listener)
    }

    /// Serve on `listener` until shutdown is requested. Every session is
    /// closed before open connections are drained.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let signal = {
            let shutdown = Arc::clone(&self.shutdown);
            let sessions = self.sessions.clone();
            async move { shutdown.sessions_closed(sessions).await }
        };
        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;
        info!("server stopped");
        Ok(())
    }

    /// Bind and serve in a background task.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        info!(%addr, mount_path = %self.config.mount_path, "tether server started");

        let shutdown = Arc::clone(&self.shutdown);
        let sessions = self.sessions.clone();
        let shutdown_timeout = self.config.shutdown_timeout;
        let task = tokio::spawn(async move {
            if let Err(err) = self.serve(listener).await {
                error!(code = err.code(), error = %err, "server failed");
            }
        });

        Ok(ServerHandle {
            addr,
            sessions,
            shutdown,
            shutdown_timeout,
            task,
        })
    }

    /// Get the session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle to a server started with [`TetherServer::start`].
pub struct ServerHandle {
    addr: SocketAddr,
    sessions: SessionRegistry,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_timeout: std::time::Duration,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for clients, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Registry of the running server.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Close every session and wait for the listener to stop.
    pub async fn stop(self) {
        self.shutdown
            .graceful_shutdown(vec![self.task], Some(self.shutdown_timeout))
            .await;
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(state.start_time, state.started_at, state.sessions.len());
    Json(resp)
}
