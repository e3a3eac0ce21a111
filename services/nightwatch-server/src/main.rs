//! Night Watch server process entry point (SPEC_FULL §A). Loads
//! `ReceiverConfig`, constructs the core components, starts the axum
//! HTTP/WebSocket surface, and drives the scheduler loop. Grounded on the
//! reference gateway's `main.rs`: `tracing_subscriber::registry()` with an
//! `EnvFilter`, a `CorsLayer`, `axum::serve` over a bound `TcpListener`, and
//! `tokio::select!` racing the server future against shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use nightwatch_core::{Arbiter, FftStream, NullStore, ReceiverConfig, Scheduler, StateBus, SstvScanner};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nightwatch_server::build_router;
use nightwatch_server::predictor_adapter::FilePredictor;
use nightwatch_server::state::{spawn_capture_ledger, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ReceiverConfig::from_env().context("loading ReceiverConfig")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================");
    info!("   Night Watch — ground-station orchestrator");
    info!("===========================================");
    info!(web_port = config.web_port, service_mode = %config.service_mode, "configuration loaded");

    std::fs::create_dir_all(&config.recordings_dir)
        .with_context(|| format!("creating {}", config.recordings_dir.display()))?;
    std::fs::create_dir_all(&config.images_dir)
        .with_context(|| format!("creating {}", config.images_dir.display()))?;

    let config = Arc::new(config);
    let arbiter = Arbiter::new();
    let statebus = Arc::new(StateBus::new());
    let fft = FftStream::new(arbiter.clone(), statebus.clone());
    let scanner = SstvScanner::new(arbiter.clone(), statebus.clone(), fft.clone());

    let passes_file = std::env::var("PASSES_FILE").unwrap_or_else(|_| "passes.json".to_string());
    let predictor = Arc::new(FilePredictor::new(passes_file.into()));
    let store = Arc::new(NullStore);

    let scheduler = Arc::new(Scheduler::new(
        arbiter.clone(),
        statebus.clone(),
        fft.clone(),
        scanner.clone(),
        predictor.clone(),
        store,
    ));

    let app_state = Arc::new(AppState::new(
        config.clone(),
        statebus.clone(),
        arbiter,
        fft,
        scanner,
        scheduler.clone(),
    ));
    spawn_capture_ledger(app_state.clone());

    let app = build_router(app_state.clone());

    let addr = format!("0.0.0.0:{}", config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "HTTP/WebSocket server listening");

    let scheduler_task = tokio::spawn(run_scheduler_loop(
        scheduler,
        predictor,
        statebus,
        config,
    ));

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
    }

    scheduler_task.abort();
    Ok(())
}

/// Periodically refreshes the predicted pass list and runs the scheduler
/// over whatever is currently known, the way an unattended station with no
/// fixed end time continuously re-plans around a rolling horizon.
async fn run_scheduler_loop(
    scheduler: Arc<Scheduler>,
    predictor: Arc<FilePredictor>,
    statebus: Arc<StateBus>,
    config: Arc<ReceiverConfig>,
) {
    use nightwatch_core::Predictor;

    const HORIZON: chrono::Duration = chrono::Duration::hours(24);
    const REFRESH_IDLE_POLL: std::time::Duration = std::time::Duration::from_secs(60);

    loop {
        let now = chrono::Utc::now();
        let passes = predictor.upcoming_passes(now, HORIZON).await;
        if passes.is_empty() {
            statebus.set_upcoming_passes(Vec::new());
            tokio::time::sleep(REFRESH_IDLE_POLL).await;
            continue;
        }
        scheduler.run_scheduler(passes, &config).await;
    }
}
