//! evalsrv — the eval-server daemon binary.
//!
//! Single binary that assembles every subsystem:
//! - Configuration (file + env overrides)
//! - Outbound HTTP Bridge (SSRF-safe fetch, shared across evaluations)
//! - Isolate Runner (V8 lifecycle)
//! - Admission Queue (FIFO serialization)
//! - axum router (`/eval`, `/healthz`, `/readyz`)
//!
//! # Usage
//!
//! ```text
//! evalsrv --config ./config.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;

use evalsrv_api::build_router;
use evalsrv_core::{Config, LogFormat};
use evalsrv_net::OutboundBridge;
use evalsrv_queue::AdmissionQueue;
use evalsrv_runtime::{DefaultExtensions, EvalEngine, IsolateRunner};

#[derive(Parser)]
#[command(name = "evalsrv", about = "Sandboxed code evaluation daemon")]
struct Cli {
    /// Path to the JSON config file. Falls back to EVAL_SERVER_CONFIG,
    /// then ./config.json.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var("EVAL_SERVER_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./config.json"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(err) => {
            // tracing isn't initialized yet (its format depends on the
            // config we just failed to load), so this goes to stderr.
            eprintln!(
                "evalsrv: failed to load config from {}: {err}",
                config_path.display()
            );
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);

    info!(path = %config_path.display(), port = config.port, "configuration loaded");

    run(config).await
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,evalsrv=debug,evalsrv_runtime=debug".parse().unwrap());

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let engine = EvalEngine::new();
    info!("v8 platform initialized");

    let bridge = Arc::new(OutboundBridge::new(config.max_fetch_concurrency)?);
    info!(
        max_fetch_concurrency = config.max_fetch_concurrency,
        "outbound bridge ready"
    );

    let runner = IsolateRunner::new(engine, bridge, Arc::new(DefaultExtensions));
    let queue = AdmissionQueue::new(runner, config.queue_capacity);
    info!(capacity = config.queue_capacity, "admission queue ready");

    let router = build_router(queue, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("evalsrv shut down");
    Ok(())
}

/// Waits for ctrl-c or, on unix, SIGTERM — whichever arrives first — so
/// the process exits cleanly under both an interactive ctrl-c and an
/// orchestrator-issued termination.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
