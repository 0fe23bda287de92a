//! Fieldsync Daemon - keeps the device's local replica in sync with the
//! remote store and serves it to local apps.

use std::sync::Arc;

use fieldsync_engine::field_registry;
use fieldsync_server::config::Config;
use fieldsync_server::remote::{HttpRemote, RemoteClient};
use fieldsync_server::store::SharedStore;
use fieldsync_server::sync::{monitor, Connectivity, SyncScheduler};
use fieldsync_server::websocket::{spawn_change_forwarder, ConnectionManager};
use fieldsync_server::{app, AppState};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        "Starting Fieldsync Daemon on {}:{} (tenant {})",
        config.host,
        config.port,
        config.tenant_id
    );

    // Open the local replica
    let registry = field_registry()?;
    let store = SharedStore::open(registry, &config.data_dir).await?;

    // Remote store client
    let mut remote = HttpRemote::new(&config.remote_url)?.with_timeout(config.remote_timeout)?;
    if let Some(key) = &config.remote_api_key {
        remote = remote.with_api_key(key.clone());
    }
    if let Some(token) = &config.remote_auth_token {
        remote = remote.with_auth_token(token.clone());
    }
    let remote: Arc<dyn RemoteClient> = Arc::new(remote);

    let connectivity = Connectivity::new(false);
    let scheduler = Arc::new(SyncScheduler::new(
        store.clone(),
        remote.clone(),
        connectivity.clone(),
        config.tenant_id.clone(),
        config.remote_timeout,
    ));

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn(monitor(
        remote,
        connectivity,
        config.connectivity_probe,
        config.remote_timeout,
        shutdown_rx.clone(),
    ));
    let scheduler_handle = tokio::spawn(
        scheduler
            .clone()
            .run(config.sync_interval, shutdown_rx),
    );

    let conn_manager = ConnectionManager::new_shared();
    let forwarder_handle = spawn_change_forwarder(&store, conn_manager.clone());

    let state = AppState {
        store,
        scheduler,
        config: Arc::new(config.clone()),
        conn_manager,
    };

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Local API listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    // Let a running cycle finish before exiting
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        tracing::error!("Sync scheduler task failed: {}", e);
    }
    if let Err(e) = monitor_handle.await {
        tracing::error!("Connectivity monitor task failed: {}", e);
    }
    forwarder_handle.abort();

    tracing::info!("Fieldsync Daemon stopped");
    Ok(())
}
