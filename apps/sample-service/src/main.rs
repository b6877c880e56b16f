//! Sample Service Binary
//!
//! # Usage
//!
//! ```bash
//! sample-service run                  # start all listeners
//! sample-service -c dev.yaml run      # explicit config file
//! sample-service version              # print build metadata
//! ```
//!
//! # Environment Variables
//!
//! - `SAMPLE_SERVICE_*`: Config overrides, `__` separates sections
//!   (e.g. `SAMPLE_SERVICE_API__GRPC__LISTEN_ADDRESS=127.0.0.1:9000`)
//! - `RUST_LOG`: Log filter (default: configured `logging.level`)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sample_service::infrastructure::telemetry;
use sample_service::infrastructure::tls::{ensure_dev_certs, install_crypto_provider};
use sample_service::{BuildInfo, Config, SYSTEM_NAME, build_app, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = SYSTEM_NAME, version, about = "gRPC service with an HTTP/JSON gateway")]
struct Cli {
    /// Config file (default: ./config.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the listeners and block until a shutdown signal.
    Run,
    /// Print build metadata.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    install_crypto_provider();

    load_dotenv();

    let config = Config::load(cli.config.as_deref(), |_| {}).context("loading configuration")?;
    let _telemetry_guard = telemetry::init(&config.logging);

    match cli.command {
        Command::Version => {
            let build = BuildInfo::current();
            tracing::info!(
                version = %build.version,
                commit = %build.commit,
                date = %build.date,
                "{SYSTEM_NAME}"
            );
            println!("{SYSTEM_NAME} {build}");
            Ok(())
        }
        Command::Run => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let _metrics_handle = init_metrics();

    if ensure_dev_certs(&config.api).context("generating development certificates")? {
        tracing::info!("Development certificates generated");
    }

    let app = build_app(config, CancellationToken::new());
    let mut server = app.server;

    tracing::info!(
        grpc = %app.config.api.grpc.listen_address,
        gateway = %app.config.api.gateway.listen_address,
        health = %app.config.api.health.listen_address,
        "Starting {SYSTEM_NAME}"
    );

    if let Err(e) = server.start().await {
        if let Err(stop) = server.stop().await {
            tracing::warn!(error = %stop, "Cleanup after failed start");
        }
        return Err(e).context("starting server");
    }

    tokio::select! {
        result = await_shutdown() => result?,
        () = app.context.cancelled() => tracing::warn!("Lifetime context cancelled"),
    }

    server.stop().await.context("stopping server")?;
    tracing::info!("{SYSTEM_NAME} stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.context("waiting for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
    Ok(())
}
