mod api;
mod auto_approve;
mod config;
mod discovery;
mod error;
mod events;
mod inbox;
mod inbox_manager;
mod registry;
mod storage;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::DiscoveryResult;
use crate::auto_approve::AutomaticInboxProcessor;
use crate::config::{Config, StorageBackend};
use crate::discovery::DiscoverySink;
use crate::events::BroadcastPublisher;
use crate::inbox::{Inbox, InboxHandle};
use crate::registry::{
    GenericThingFactory, MemoryThingRegistry, StaticThingTypeRegistry, ThingStatusListener,
};
use crate::storage::{SqliteStorage, Storage, VolatileStorage};

const INBOX_NAMESPACE: &str = "inbox";

fn open_storage(config: &Config) -> Result<Arc<dyn Storage<DiscoveryResult>>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let storage: SqliteStorage<DiscoveryResult> =
                SqliteStorage::open(&config.storage.db_path, INBOX_NAMESPACE)?;
            tracing::info!("Opened database at {:?}", config.storage.db_path);
            Ok(Arc::new(storage))
        }
        StorageBackend::Memory => {
            tracing::info!("Using volatile inbox storage");
            Ok(Arc::new(VolatileStorage::<DiscoveryResult>::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("inboxd=info")),
        )
        .init();

    tracing::info!("Starting inboxd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/inboxd/inboxd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!(
        "Loaded config from {} ({} thing types)",
        config_path,
        config.thing_types.len()
    );

    let storage = open_storage(&config)?;

    // Collaborators
    let things = Arc::new(MemoryThingRegistry::new());
    let thing_types = Arc::new(StaticThingTypeRegistry::new(config.thing_types.clone()));
    let events = Arc::new(BroadcastPublisher::new(256));

    let inbox = Arc::new(
        Inbox::new(storage, things.clone(), thing_types.clone()).with_publisher(events.clone()),
    );
    inbox.add_thing_handler_factory(Arc::new(GenericThingFactory::new(thing_types.clone())));
    inbox.activate();
    tracing::info!("Inbox holds {} results", inbox.get_all().len());

    let processor = Arc::new(AutomaticInboxProcessor::new(
        inbox.clone(),
        things.clone(),
        thing_types.clone(),
    ));
    processor.activate(&config.automation);
    let status_listener: Arc<dyn ThingStatusListener> = processor.clone();
    things.add_status_listener(status_listener.clone());

    // Start inbox worker thread
    let inbox_handle = InboxHandle::spawn(inbox.clone());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn inbox manager task
    let (discovery_tx, discovery_rx) = mpsc::channel(256);
    let mgr_cancel = cancel.clone();
    let mgr_config = config.inbox.clone();
    let mgr_inbox = inbox_handle.clone();
    let mgr_handle = tokio::spawn(async move {
        if let Err(e) = inbox_manager::run(mgr_inbox, discovery_rx, mgr_config, mgr_cancel).await {
            tracing::error!("Inbox manager error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        inbox: inbox.clone(),
        things: things.clone(),
        discovery: DiscoverySink::new("api", discovery_tx),
        events,
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = tokio::join!(mgr_handle, server_handle);

    // Delayed results resolve as not added
    if let Err(e) = inbox_handle.shutdown() {
        tracing::error!("Failed to shutdown inbox worker: {}", e);
    }

    things.remove_status_listener(&status_listener);
    processor.deactivate();
    inbox.deactivate();

    tracing::info!("Shutdown complete");
    Ok(())
}
