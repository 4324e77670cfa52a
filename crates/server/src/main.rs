use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concierge_core::{
    connect_store, load_config, validate_config, Messenger, RelayDispatcher, RelayRouter,
    TicketRegistry,
};
use concierge_server::api::create_router;
use concierge_server::state::AppState;
use concierge_server::telegram::{TelegramClient, TelegramPoller};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("CONCIERGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database backend: {:?}", config.database.backend);
    info!("Admin group: {}", config.telegram.admin_group_id);

    // Ticket store
    let store = connect_store(&config.database)
        .await
        .context("Failed to open ticket store")?;
    info!("Ticket store initialized ({})", store.backend_name());

    // Routing registry, rebuilt from the store
    let registry = Arc::new(TicketRegistry::new(
        Arc::clone(&store),
        config.database.retry_policy(),
    ));
    let loaded = registry
        .rebuild()
        .await
        .context("Failed to load tickets into the registry")?;
    info!("Registry loaded {} tickets", loaded);
    for ticket in registry.unbound_open_tickets() {
        warn!(
            ticket_id = %ticket.id,
            user_id = %ticket.user_id,
            "Open ticket has no channel, it will get one on the next message"
        );
    }

    // Telegram transport
    let telegram = Arc::new(
        TelegramClient::new(&config.telegram).context("Failed to create Telegram client")?,
    );
    let messenger: Arc<dyn Messenger> = Arc::clone(&telegram) as Arc<dyn Messenger>;

    // Relay
    let router = Arc::new(RelayRouter::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        messenger,
        config.lifecycle.clone(),
    ));
    let dispatcher = RelayDispatcher::new(
        router,
        Duration::from_secs(config.relay.worker_idle_secs),
    );

    // Long polling
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = TelegramPoller::new(
        Arc::clone(&telegram),
        dispatcher.clone(),
        config.telegram.poll_timeout_secs,
        Duration::from_secs(config.telegram.restart_delay_secs),
    );
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    // Create app state
    let state = Arc::new(
        AppState::new(&config, Arc::clone(&store), Arc::clone(&registry))
            .with_dispatcher(dispatcher.clone()),
    );

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Stop intake first, then let queued events drain
    let _ = shutdown_tx.send(true);
    if let Err(e) = poller_handle.await {
        warn!("Poller task ended abnormally: {}", e);
    }
    dispatcher.shutdown().await;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
