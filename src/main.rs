// =============================================================================
// Aurum Engine — Main Entry Point
// =============================================================================
//
// Real-time gold-price analysis and trading-signal engine: tick feed ->
// candle materialization -> layered hybrid analysis -> paper-trading
// simulations, with a read-only dashboard API on top.
//
// Shutdown order matters: feed first, drain pending analyses, then the
// simulation loop, then flush state.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzers;
mod api;
mod app_state;
mod error;
mod hybrid;
mod indicators;
mod market_data;
mod runtime_config;
mod simulation;
mod storage;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::hybrid::HybridOrchestrator;
use crate::market_data::feed::{run_feed_worker, FeedDispatcher, RawTick};
use crate::market_data::TickStore;
use crate::runtime_config::RuntimeConfig;
use crate::simulation::SimulationEngine;
use crate::storage::Storage;

/// Feed hand-off queue depth; overflow drops the analysis pass, not the tick.
const FEED_QUEUE_DEPTH: usize = 256;

/// In-memory tick window: ~7 days of 5-second ticks.
const TICK_WINDOW: usize = 120_960;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Aurum Engine starting up");

    let config_path =
        std::env::var("AURUM_CONFIG").unwrap_or_else(|_| "runtime_config.json".to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(db_path) = std::env::var("AURUM_DB") {
        config.database_path = db_path;
    }

    // Impossible configuration is fatal.
    config.validate().context("refusing to start")?;
    let config = Arc::new(config);

    // ── 2. Core state ────────────────────────────────────────────────────
    let storage = Arc::new(Storage::open(&config.database_path)?);
    let tick_store = Arc::new(TickStore::new(TICK_WINDOW));
    let orchestrator = Arc::new(HybridOrchestrator::new(
        tick_store.clone(),
        storage.clone(),
        config.clone(),
    ));

    let simulation_engine = Arc::new(SimulationEngine::new(
        storage.clone(),
        orchestrator.clone(),
        tick_store.clone(),
        config.clone(),
    ));
    let loaded = simulation_engine.start()?;
    info!(simulations = loaded, "simulation engine initialised");

    let state = Arc::new(AppState::new(
        config.clone(),
        tick_store.clone(),
        storage.clone(),
        orchestrator.clone(),
        simulation_engine.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 3. Feed pipeline ─────────────────────────────────────────────────
    let (feed_tx, feed_rx) = mpsc::channel(FEED_QUEUE_DEPTH);
    let dispatcher = Arc::new(FeedDispatcher::new(tick_store.clone(), feed_tx));

    let worker_storage = storage.clone();
    let worker_orchestrator = orchestrator.clone();
    let feed_worker = tokio::spawn(async move {
        run_feed_worker(feed_rx, worker_storage, worker_orchestrator).await;
    });

    // Optional local transport: a JSON-lines tick file named by AURUM_FEED_FILE.
    // Any other transport just needs a FeedDispatcher handle.
    let file_feed = std::env::var("AURUM_FEED_FILE").ok().map(|path| {
        let dispatcher = dispatcher.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            info!(path = %path, "file feed transport starting");
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    error!(path = %path, error = %e, "failed to read feed file");
                    return;
                }
            };

            for line in content.lines() {
                if *shutdown.borrow() {
                    break;
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawTick>(line) {
                    Ok(raw) => {
                        dispatcher.on_tick(raw);
                    }
                    Err(e) => warn!(error = %e, "unparseable feed line skipped"),
                }
                // Pace the replay so ticks don't flood the worker queue.
                tokio::select! {
                    _ = tokio::time::sleep(tokio::time::Duration::from_millis(10)) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("file feed transport finished");
        })
    });

    // ── 4. API server ────────────────────────────────────────────────────
    let bind_addr = std::env::var("AURUM_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    {
        let api_state = state.clone();
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "API server listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "API server failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind API server"),
            }
        });
    }

    // ── 5. Simulation loop ───────────────────────────────────────────────
    let sim_handle = tokio::spawn(simulation_engine.clone().run(shutdown_rx.clone()));

    // ── 6. Maintenance loop (daily retention pruning) ────────────────────
    {
        let storage = storage.clone();
        let tick_store = tick_store.clone();
        let retention_days = config.tick_retention_days;
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(24 * 3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cutoff = chrono::Utc::now()
                            - chrono::Duration::days(i64::from(retention_days));
                        match storage.prune_ticks_before(cutoff) {
                            Ok(removed) if removed > 0 => {
                                info!(removed, "pruned aged price rows");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "retention pruning failed"),
                        }
                        tick_store.prune_older_than(cutoff);
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    // Feed first: stop the transport, release the dispatcher so the worker
    // channel closes, then drain pending analyses.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = file_feed {
        let _ = handle.await;
    }
    drop(dispatcher);
    if let Err(e) = feed_worker.await {
        error!(error = %e, "feed worker join failed");
    }

    // Then the simulation loop (flushes its own state on exit).
    if let Err(e) = sim_handle.await {
        error!(error = %e, "simulation loop join failed");
    }

    if let Err(e) = config.save(&config_path) {
        warn!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Aurum Engine shut down complete");
    Ok(())
}
