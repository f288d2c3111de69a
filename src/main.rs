// =============================================================================
// Confluence Engine: Main Entry Point
// =============================================================================
//
// Runs the confluence pipeline against the paper book. One evaluation task
// drives the scheduler; the diagnostics API only reads shared state.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, DurationRound, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use confluence_engine::api;
use confluence_engine::app_state::AppState;
use confluence_engine::runtime_config::RuntimeConfig;
use confluence_engine::scheduler::{EngineEvent, Pipeline};
use confluence_engine::signals::feed::synthetic_price;
use confluence_engine::signals::{AnalyzerModule, ModuleKind, WaveAnalyzer};

const CONFIG_PATH: &str = "runtime_config.json";
/// Evaluation ticks between forced refreshes of every symbol.
const TIMER_EVERY_TICKS: u64 = 12;
/// Synthetic bar length in seconds.
const BAR_SECS: i64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Confluence Engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(syms) = std::env::var("CONFLUENCE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(addr) = std::env::var("CONFLUENCE_BIND_ADDR") {
        config.bind_addr = addr;
    }
    let config = config.sanitized();

    info!(
        symbols = ?config.symbols,
        interval_secs = config.evaluation_interval_secs,
        "Configured symbols"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let modules: Vec<Box<dyn AnalyzerModule>> = ModuleKind::ALL
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            Box::new(WaveAnalyzer::new(*kind, 24.0 + 6.0 * i as f64)) as Box<dyn AnalyzerModule>
        })
        .collect();
    let bind_addr = config.bind_addr.clone();
    let interval_secs = config.evaluation_interval_secs.max(1);
    let state = Arc::new(AppState::new(config, modules));

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_api(api_state, &bind_addr).await {
            error!(error = %e, "API server stopped");
        }
    });

    // ── 4. Evaluation loop ───────────────────────────────────────────────
    let pipeline = Pipeline::new(state.clone());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        let mut step: u64 = 0;
        let mut last_bar = None;

        loop {
            interval.tick().await;
            step += 1;

            let now = Utc::now();
            let bar_time = now.duration_trunc(Duration::seconds(BAR_SECS)).ok();
            let new_bar = bar_time.filter(|t| last_bar != Some(*t));
            if new_bar.is_some() {
                last_bar = new_bar;
            }

            let symbols = pipeline.state().engine.read().symbols();
            for symbol in &symbols {
                pipeline
                    .state()
                    .position_manager
                    .update_price(symbol, synthetic_price(symbol, step));

                let event = match new_bar {
                    Some(bar_time) => EngineEvent::NewBar {
                        symbol: symbol.clone(),
                        bar_time,
                    },
                    None => EngineEvent::Tick {
                        symbol: symbol.clone(),
                    },
                };
                pipeline.handle(event);
            }

            if step % TIMER_EVERY_TICKS == 0 {
                pipeline.handle(EngineEvent::Timer);
                info!(status = %pipeline.state().engine.read().status(), "engine status");
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received: stopping gracefully");

    state.engine.write().deinitialize();
    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Confluence Engine shut down complete.");
    Ok(())
}

async fn serve_api(state: Arc<AppState>, bind_addr: &str) -> anyhow::Result<()> {
    let app = api::rest::router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");
    axum::serve(listener, app).await.context("API server failed")
}
