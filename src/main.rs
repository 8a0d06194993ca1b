use anyhow::{Context, Result};
use clap::Parser;
use fitmirror::{
    AppState, BiometricsLog, Config, JsonlMetricsStore, PostureHub, SessionManager,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "fitmirror", about = "Smart mirror session coordination service")]
struct Cli {
    /// Config file to load (extension inferred)
    #[arg(long, default_value = "config/fitmirror")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("fitmirror v0.1.0");
    info!("Loaded config: {}", cfg.service.name);

    let posture = Arc::new(PostureHub::new(&cfg.session.default_exercise));
    let biometrics = Arc::new(BiometricsLog::default());
    let store = Arc::new(JsonlMetricsStore::new(&cfg.storage.metrics_path));
    let manager = Arc::new(SessionManager::new(
        cfg.session_settings(),
        posture.clone(),
        biometrics,
        store,
    ));

    if cfg.voice.enabled {
        // The listener needs a speech decoder backend plugged in through
        // the library API; this binary ships none and degrades to the
        // device-less POST /voice/test path.
        warn!("voice.enabled is set but no speech decoder backend is configured; voice commands stay available via POST /voice/test");
    }

    let state = AppState::new(manager, posture);
    let app = fitmirror::create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app).await.context("HTTP server exited")?;

    Ok(())
}
