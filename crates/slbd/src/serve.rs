//! Daemon wiring: store, engine, ingress, shutdown.

use std::sync::Arc;

use tracing::{error, info};

use slb_api::{ApiState, build_router};
use slb_core::SlbConfig;
use slb_scheduler::Engine;
use slb_state::StateStore;

pub async fn run(config: SlbConfig) -> anyhow::Result<()> {
    info!("SLB daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("slb.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "policy store opened");

    let engine = Engine::start(&config.scheduler, Arc::new(store))?;

    // ── Start ingress ──────────────────────────────────────────

    let router = build_router(ApiState::new(engine.handle()));
    let addr = config.server.listen;
    info!(%addr, "ingress starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    engine.shutdown().await;

    info!("SLB daemon stopped");
    Ok(())
}
