//! PeerStash coordinator binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peerstash_coordinator::{build_router, AppState, Coordinator, CoordinatorConfig, ExpirySweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ═══════════════════════════════════════════════════════════════════════
    // Step 0: Configuration (.env, optional TOML file, environment)
    // ═══════════════════════════════════════════════════════════════════════
    let config = CoordinatorConfig::load().context("configuration error")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("═══════════════════════════════════════════════════════════════");
    info!("                    PeerStash Coordinator                       ");
    info!("═══════════════════════════════════════════════════════════════");
    info!("HTTP Server:     {}:{}", config.host, config.port);
    info!("Pending TTL:     {:?}", config.pending_ttl);
    info!("Approved TTL:    {:?}", config.approved_ttl);
    info!("Transfer root:   {}", config.transfer_root.display());
    match &config.nodes_snapshot_path {
        Some(path) => info!("Node snapshot:   {}", path.display()),
        None => info!("Node snapshot:   (in-memory only)"),
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Step 1: Store and background expiry
    // ═══════════════════════════════════════════════════════════════════════
    let coordinator = Coordinator::from_config(&config).context("failed to load node snapshot")?;
    let sweeper = ExpirySweeper::new(Arc::clone(coordinator.ledger()), config.sweep_interval);
    let _sweep_task = sweeper.start();

    // ═══════════════════════════════════════════════════════════════════════
    // Step 2: HTTP server
    // ═══════════════════════════════════════════════════════════════════════
    let app = build_router(Arc::new(AppState::new(coordinator)));
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!("🚀 Coordinator listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    sweeper.stop();
    info!("coordinator stopped");
    Ok(())
}
