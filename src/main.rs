use std::sync::Arc;
use std::time::Duration;

use recast::{
    blobstore::{BlobStore, MemoryBlobStore, S3BlobStore},
    content::PlainTextExtractor,
    create_db_pool, create_router,
    events::bus::create_redis_pool,
    executor::{ExecutorContext, TransformationExecutor},
    init_tracing, shutdown_telemetry, AppState, Config,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    init_tracing(&config);

    info!(
        service = "recast",
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting server"
    );

    let issues = config.validate_for_production();
    for issue in &issues {
        warn!(issue = %issue, "Configuration warning");
    }

    info!(
        database_url = %config.database.url.split('@').next_back().unwrap_or("***"),
        max_connections = config.database.max_connections,
        "Connecting to database"
    );

    let db_pool = create_db_pool(&config);
    let broker_pool = create_redis_pool(&config.broker);

    let blob_store: Arc<dyn BlobStore> = if config.blob_store.url.is_some() {
        match S3BlobStore::from_config(&config.blob_store).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "Failed to initialize blob store");
                std::process::exit(1);
            }
        }
    } else {
        warn!("No blob store configured; document bytes are held in memory");
        Arc::new(MemoryBlobStore::new())
    };

    let extractor = Arc::new(PlainTextExtractor::new());

    let state = AppState::new(
        db_pool.clone(),
        broker_pool.clone(),
        blob_store.clone(),
        extractor.clone(),
        config.clone(),
    );

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);

    // Event fabric: broker subscriber feeds the local stream; the hub routes
    // it to sessions; presence gossips summaries.
    if let Some(broker_url) = config.broker.url.clone() {
        let bus = state.bus.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            bus.run_subscriber(broker_url, shutdown_rx).await;
        });
    }

    {
        let hub = state.hub.clone();
        let bus = state.bus.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            hub.run_dispatch(bus, shutdown_rx).await;
        });
    }

    {
        let hub = state.hub.clone();
        let heartbeat = Duration::from_secs(config.realtime.heartbeat_secs);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            hub.run_reaper(heartbeat, shutdown_rx).await;
        });
    }

    {
        let presence = state.hub.presence.clone();
        let bus = state.bus.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            presence.run_gossip(bus, shutdown_rx).await;
        });
    }

    let registry = Arc::new(recast::providers::ProviderRegistry::from_config(
        &config.providers,
        broker_pool,
    ));

    let executor = TransformationExecutor::new(ExecutorContext {
        db_pool,
        registry,
        bus: state.bus.clone(),
        blob_store,
        extractor,
        queue_config: config.queue.clone(),
        signal: state.queue_signal.clone(),
    });
    let (executor_shutdown, executor_handles) = executor.spawn_pool();

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %config.server.bind_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %config.server.bind_addr,
        docs_url = %format!("http://{}/swagger-ui", config.server.bind_addr),
        "HTTP server ready"
    );

    let server = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
        }
    };

    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = ctrl_c => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = executor_shutdown.send(true);

    info!("Waiting for workers to finish in-flight jobs...");
    for handle in executor_handles {
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }

    shutdown_telemetry();

    info!("Server shutdown complete");
}
