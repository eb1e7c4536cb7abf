//! allocentrad — HTTP daemon exposing the Allocentra allocation engine.
//!
//! Serves the cycle/request/run/audit API over axum, backed by the
//! in-memory stores. Runs are started with `POST /runs` (202 Accepted)
//! and polled via `GET /runs/:id`.

mod api;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, Level};

use allocentra_engine::{init_tracing, EngineConfig};

#[derive(Debug, Parser)]
#[command(name = "allocentrad", version, about = "Allocentra allocation engine daemon")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "ALLOCENTRA_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Emit newline-delimited JSON log lines.
    #[arg(long, env = "ALLOCENTRA_JSON_LOGS")]
    json_logs: bool,

    /// Default log verbosity when RUST_LOG is unset.
    #[arg(long, env = "ALLOCENTRA_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Wall-clock budget for the apply phase of each run, in
    /// milliseconds. 0 disables the budget.
    #[arg(long, env = "ALLOCENTRA_RUN_TIMEOUT_MS", default_value_t = 30_000)]
    run_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs, args.log_level);

    let config = EngineConfig {
        default_timeout: (args.run_timeout_ms > 0)
            .then(|| Duration::from_millis(args.run_timeout_ms)),
        ..EngineConfig::default()
    };
    let state = api::AppState::new(config);
    let app = api::router(state);

    let listener = TcpListener::bind(args.bind).await?;
    info!(
        addr = %args.bind,
        version = allocentra_engine::VERSION,
        "allocentrad listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
