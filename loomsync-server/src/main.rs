//! `loomsyncd` — the hot-reload session server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loomsync_config::cli::Args;
use loomsync_server::dispatcher::{DispatcherConfig, UpdateDispatcher};
use loomsync_server::session::{SessionRegistry, SessionRegistryConfig};
use loomsync_server::{http, ws, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loomsync_server=debug,loomsync_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, warnings) = loomsync_config::load(args.config_path())?;
    for warning in warnings.items() {
        warn!(hint = warning.hint.as_deref().unwrap_or(""), "{}", warning.message);
    }
    info!(mode = ?config.mode, "configuration loaded");

    let storage_dir = args.storage_dir.clone().unwrap_or_else(|| config.storage_dir.clone());
    std::fs::create_dir_all(&storage_dir)?;

    let mut conflict_rx = loomsync_server::pipeline::spawn(Arc::new(config), storage_dir);
    tokio::spawn(async move {
        while let Ok(conflict) = conflict_rx.recv().await {
            warn!(id = %conflict.id, "conflict recorded, awaiting manual resolution");
        }
    });

    let registry = SessionRegistry::new(SessionRegistryConfig::default());
    let dispatcher = UpdateDispatcher::new(registry.clone(), DispatcherConfig::default());

    let cancel = tokio_util::sync::CancellationToken::new();
    registry.spawn_background(cancel.clone());

    let state = AppState::new(registry, dispatcher);

    let app = http::router()
        .route("/ws", axum::routing::get(ws::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = args.listen_addr();
    info!(%addr, "starting loomsyncd");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_cancel = cancel.clone();
    let shutdown_signal = async move {
        let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler") };
        ctrl_c.await;
        info!("shutdown signal received, draining in-flight work");
        shutdown_cancel.cancel();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    cancel.cancel();
    Ok(())
}
