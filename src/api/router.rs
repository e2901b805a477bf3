//! API router configuration.

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::handlers::{
    api_info, compile, delete_file, execute, health, list_files, read_file, save_file, AppState,
};
use super::websocket::ws_handler;
use crate::error::TunnelError;

/// Create the API router with the given state.
pub fn create_router(state: AppState) -> Router {
    let files = Router::new()
        .route("/list", get(list_files))
        .route("/read", get(read_file))
        .route("/save", post(save_file))
        .route("/delete", post(delete_file));

    let api = Router::new()
        .route("/", get(api_info))
        .route("/execute", post(execute))
        .route("/compile", post(compile))
        .nest("/files", files);

    Router::new()
        .route("/health", get(health))
        .route("/ws", any(ws_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Stop accepting on Ctrl-C/SIGTERM and reclaim session processes.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            graceful_shutdown: true,
        }
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 3000)
    }
}

/// Start the API server and run until shutdown.
pub async fn serve(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let terminals = state.terminals.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TunnelError::Startup(format!("cannot listen on {}: {}", addr, e)))?;
    info!("sandbox-tunnel listening on {}", addr);

    let server = axum::serve(listener, router);
    let result = if config.graceful_shutdown {
        server.with_graceful_shutdown(shutdown_signal()).await
    } else {
        server.await
    };

    terminals.shutdown();
    result.map_err(|e| TunnelError::Io(std::io::Error::other(e.to_string())))?;

    info!("sandbox-tunnel stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(config.graceful_shutdown);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_server_config_custom() {
        let config = ServerConfig::new("0.0.0.0", 8080).without_graceful_shutdown();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(!config.graceful_shutdown);
    }

    #[tokio::test]
    async fn test_serve_reports_busy_port() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let dir = tempfile::TempDir::new().unwrap();

        let err = serve(
            ServerConfig::new("127.0.0.1", port),
            AppState::with_workspace_root(dir.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TunnelError::Startup(_)));
    }
}
