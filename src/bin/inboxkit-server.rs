//! Standalone server: the inboxkit routes over JSON-file stores.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use inboxkit::middleware::{ServerConfig, api_routes};
use inboxkit::{FileGrantStore, FileSessionStore, FileUserStore};
use time::OffsetDateTime;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inboxkit=info,inboxkit_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let data_dir = PathBuf::from(std::env::var("INBOXKIT_DATA_DIR").unwrap_or_else(|_| "data".into()));
    let bind: SocketAddr = std::env::var("INBOXKIT_BIND")
        .unwrap_or_else(|_| "127.0.0.1:3000".into())
        .parse()?;

    let users = FileUserStore::open(data_dir.join("users.json")).await?;
    let sessions = Arc::new(FileSessionStore::open(data_dir.join("sessions.json")).await?);
    let grants = FileGrantStore::open(data_dir.join("grants.json")).await?;

    let purge = Arc::clone(&sessions);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tick.tick().await;
            match purge.purge_expired(OffsetDateTime::now_utc()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session purge failed"),
            }
        }
    });

    let app = api_routes(config, users, sessions, grants);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, data_dir = %data_dir.display(), "inboxkit server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
