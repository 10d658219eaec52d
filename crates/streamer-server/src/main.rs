use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use streamer_server::storage::Storage;
use streamer_server::{AppState, router};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamer_server=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("STREAMER_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("STREAMER_SERVER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let storage_dir: PathBuf = std::env::var("STREAMER_STORAGE_DIR")
        .unwrap_or_else(|_| "./uploads".into())
        .into();

    let storage = Arc::new(Storage::new(storage_dir).await?);
    let app = router(AppState { storage });

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Streamer server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
