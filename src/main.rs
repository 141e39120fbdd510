use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context;
use streamhub::{
    auth::Credentials,
    config::Config,
    hub::{Hub, HubParts, Timings},
    moderation::ModerationStore,
    notify::{NotificationSink, NullSink, WebhookSink},
    store::{SqliteStore, Store},
    AppState,
};
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    store.clear_sessions().await?;

    let records = store.load_moderation(OffsetDateTime::now_utc()).await?;
    let moderation = ModerationStore::from_records(records);
    info!(bans = moderation.active_bans(OffsetDateTime::now_utc()).len(), "moderation state loaded");

    let sink: Arc<dyn NotificationSink> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.as_str())?),
        None => {
            warn!("DISCORD_WEBHOOK_URL not set, notifications disabled");
            Arc::new(NullSink)
        }
    };

    let (hub, hub_task) = Hub::spawn(HubParts {
        credentials: Credentials::from_config(&config),
        store: Arc::new(store),
        sink,
        moderation,
        timings: Timings::default(),
    });

    let app = streamhub::router(AppState { hub: hub.clone() });
    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("binding {}", config.listen_addr()))?;
    info!(addr = %config.listen_addr(), "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.shutdown().await;
    hub_task.await?;
    Ok(())
}

/// Directory holding a file-backed SQLite database, if any.
fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    let path = url.strip_prefix("sqlite://")?.split('?').next()?;
    Path::new(path).parent().filter(|dir| !dir.as_os_str().is_empty())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
