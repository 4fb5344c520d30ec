//! Mailsurge - campaign dispatch engine entry point

use anyhow::Result;
use mailsurge_api::AppState;
use mailsurge_common::config::{Config, LoggingConfig};
use mailsurge_core::{
    BatchDispatcher, CampaignManager, EventProcessor, SmtpGateway, SweepWorker, TransportGateway,
};
use mailsurge_storage::db::DatabasePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so logging can honor it
    let config = Config::load()?;
    init_logging(&config.logging);

    info!("Starting Mailsurge dispatch engine...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.migrate().await?;

    // Dispatch channel: campaign actions on one end, the batch
    // dispatcher on the other
    let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

    let manager = Arc::new(CampaignManager::new(&db_pool, dispatch_tx));
    let processor = EventProcessor::new(&db_pool);

    // Start the batch dispatcher
    let gateway: Arc<dyn TransportGateway> = Arc::new(SmtpGateway::new(&config.transport)?);
    let dispatcher = BatchDispatcher::new(
        &db_pool,
        gateway,
        &config.dispatch,
        &config.tracking,
        dispatch_rx,
    );
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run().await;
    });

    // Start the sweep worker
    let sweep_handle = {
        let sweep = SweepWorker::new(manager.clone(), config.dispatch.sweep_interval_secs);
        tokio::spawn(async move {
            sweep.run().await;
        })
    };

    // Start the HTTP server
    let state = Arc::new(AppState {
        db_pool,
        manager,
        processor,
    });
    let app = mailsurge_api::create_router(state);

    let bind = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("HTTP server listening on {}", bind);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    info!("Mailsurge started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server_handle.abort();
    sweep_handle.abort();
    dispatcher_handle.abort();

    info!("Mailsurge shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailsurge=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
