//! layer-gateway-server — REST gateway for multi-account Telegram login,
//! search and forwarding.
//!
//! ```text
//! API_ID=12345 API_HASH=0123456789abcdef cargo run -p layer-gateway-server
//! ```
//!
//! Logging follows `RUST_LOG`; the default shows gateway activity and
//! layer-client warnings.

mod config;
mod error;
mod routes;

use std::sync::Arc;

use clap::Parser;
use layer_gateway::{JsonFileStore, SessionManager};
use tokio::net::TcpListener;

use config::Config;
use routes::AppState;

const DEFAULT_LOG: &str = "layer_gateway=info,layer_gateway_server=info,layer_client=warn";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG)).init();

    let config = Config::parse();
    if let Err(e) = run(config).await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let store   = JsonFileStore::new(&config.sessions_file);
    let manager = Arc::new(SessionManager::open(Arc::new(config.factory()), Arc::new(store)).await?);

    let app = routes::router(AppState { manager: manager.clone(), app: config.app() });

    let addr     = config.addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("[server] listening on http://{addr} (sessions: {})", config.sessions_file.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown();
    tracing::info!("[server] stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("[server] ctrl-c handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e)      => {
                tracing::warn!("[server] SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c    => {}
        _ = terminate => {}
    }
    tracing::info!("[server] shutting down");
}
