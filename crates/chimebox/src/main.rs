use anyhow::{Context, Result};
use chimebox::web::{self, WebState};
use chimebox::{telemetry, Orchestrator, StateBoard};
use chimeconf::ChimeConfig;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long running playbacks may continue after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Plays sound pools on command
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file used instead of ./chimebox.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the HTTP control surface (overrides config)
    #[arg(long)]
    http_addr: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = ChimeConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(addr) = cli.http_addr {
        config.infra.bind.http_addr = addr;
    }
    config.validate().context("Invalid configuration")?;

    if cli.show_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry = telemetry::init(&config.infra.telemetry)
        .context("Failed to initialize telemetry")?;

    tracing::info!(
        device = %config.device_identifier,
        files = ?sources.files,
        env_overrides = ?sources.env_overrides,
        pools = config.pools.len(),
        "configuration loaded"
    );
    if config.pools.is_empty() {
        tracing::warn!("no pools configured");
    }

    let board = Arc::new(StateBoard::new());
    let orchestrator = Arc::new(
        Orchestrator::from_config(&config, board.clone()).context("Failed to set up pools")?,
    );

    let summary = orchestrator.refresh_all().await;
    for (pool, error) in &summary.failed {
        tracing::warn!(pool = %pool, error = %error, "pool unavailable until a later refresh succeeds");
    }
    orchestrator.report_initial_state().await;

    let shutdown_token = CancellationToken::new();
    let refresh_loop = orchestrator.spawn_refresh_loop(
        Duration::from_secs(config.infra.refresh.interval_secs),
        shutdown_token.clone(),
    );

    let app = web::router(WebState {
        orchestrator: orchestrator.clone(),
        board,
        started: Instant::now(),
    });
    let bind_addr: std::net::SocketAddr = config
        .infra
        .bind
        .http_addr
        .parse()
        .context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });
    let server = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    tracing::info!(addr = %bind_addr, "chimebox ready");

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        result = terminate() => {
            result.context("Failed to install SIGTERM handler")?;
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if let Err(e) = refresh_loop.await {
        tracing::warn!(error = %e, "refresh loop ended abnormally");
    }
    if let Err(e) = server.await {
        tracing::warn!(error = %e, "server task ended abnormally");
    }
    orchestrator.shutdown(SHUTDOWN_GRACE).await;

    tracing::info!("Shutdown complete");
    telemetry.shutdown();

    Ok(())
}

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
