//! HTTP server: JSON RPC routes, the JWKS document and health.

mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::{net::TcpListener, signal};
use tracing::{error, info};

pub use router::{JWKS_PATH, create_router};

use crate::config::ServerConfig;
use crate::service::AuthService;
use crate::{Error, Result};

/// Bind `config.host:config.port` and serve until a shutdown signal.
pub async fn serve(config: &ServerConfig, service: Arc<AuthService>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid bind address: {e}")))?;

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, jwks = JWKS_PATH, "Auth service listening");

    let app = create_router(service, config.request_timeout);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    info!("Auth service stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
