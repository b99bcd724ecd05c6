mod error;
mod ns_service;
mod service;
mod state;

use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tracing::info;

use lasca_core::{
    AckNackRouter, AckNackWorker, AppConfig, DequeueWorker, EnqueueWorker, NamespaceRepository,
    PriorityBuffer, ShardManager,
};

use state::AppState;

fn load_config() -> AppConfig {
    let paths = ["lasca.toml", "/etc/lasca/lasca.toml"];

    for path in &paths {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => {
                        info!(path, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        eprintln!("error parsing {path}: {e}");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("error reading {path}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("no config file found, using defaults");
    AppConfig::default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lasca_core::telemetry::init_tracing();
    info!("application starting: lasca");

    let config = load_config();
    let listen_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| config.server.listen_addr.clone());

    let mut manager = ShardManager::new();
    for shard in &config.shards {
        manager.add(shard.id, shard.main, &shard.url).await?;
    }
    let main_shard = manager
        .main_shard()
        .ok_or("shard configuration designates no main shard")?;

    let (prefetch_buf, buffer_handle) = PriorityBuffer::spawn();
    let (enqueue_tx, enqueue_rx) =
        async_channel::bounded(config.workers.enqueue_channel_capacity);

    let mut acknack_router = AckNackRouter::default();
    let mut workers = vec![buffer_handle];
    for shard in manager.shards() {
        workers.push(EnqueueWorker::spawn(Arc::clone(shard), enqueue_rx.clone()));
        workers.push(DequeueWorker::spawn(Arc::clone(shard), prefetch_buf.clone()));

        let (acknack_tx, acknack_rx) = mpsc::channel(config.workers.acknack_channel_capacity);
        workers.push(AckNackWorker::spawn(Arc::clone(shard), acknack_rx));
        acknack_router.register_worker(shard.id(), acknack_tx);
    }

    let state = AppState {
        enqueue_tx,
        prefetch_buf,
        acknack_router: Arc::new(acknack_router),
        namespaces: Arc::new(NamespaceRepository::new()),
        main_shard,
    };

    let app = Router::new()
        .route(
            "/ns",
            get(ns_service::get_namespaces).post(ns_service::create_namespace),
        )
        .route("/message/enqueue", post(service::enqueue))
        .route("/message/dequeue", post(service::dequeue))
        .route("/message/ack", post(service::ack))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "starting HTTP server");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down workers");

    // Stop in reverse spawn order so the prefetch buffer outlives the
    // dequeue workers feeding it; shard pools close after every worker
    // drained.
    for handle in workers.into_iter().rev() {
        handle.stop().await;
    }
    manager.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to install CTRL+C handler");
    }

    info!("received shutdown signal");
}
