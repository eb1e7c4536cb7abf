//! Observability: tracing initialisation and run lifecycle events.
//!
//! Binaries call [`init_tracing`] once at startup. The run controller
//! instruments each run's future with [`run_span`] so every log line
//! carries the run id, and emits the lifecycle events below at `info!`
//! level.

use tracing::{info, info_span, Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use allocentra_store::{RunId, RunMode, RunStatus};

/// Initialise the global tracing subscriber with an `EnvFilter` and
/// optional newline-delimited JSON output.
///
/// `level` is the default verbosity when `RUST_LOG` is unset; `RUST_LOG`
/// wins when present. Calling this more than once is harmless — the
/// global subscriber can only be set once per process, later calls are
/// no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Span tagging every log line of one run with its id.
///
/// Attach it to the run's future with `tracing::Instrument`; unlike an
/// entered guard, the span then follows the future across await points
/// and into spawned tasks.
pub fn run_span(run_id: RunId) -> Span {
    info_span!("allocentra.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: RunId, mode: RunMode, total_requests: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        mode = ?mode,
        total_requests = total_requests,
    );
}

/// Emit event: run reached a terminal status.
pub fn emit_run_finished(run_id: RunId, status: RunStatus, committed: bool, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = ?status,
        committed = committed,
        duration_ms = duration_ms,
    );
}

/// Emit event: an audit entry was appended for a committed mutation.
pub fn emit_audit_appended(run_id: Option<RunId>, action: &str) {
    match run_id {
        Some(id) => info!(event = "audit.appended", run_id = %id, action = %action),
        None => info!(event = "audit.appended", action = %action),
    }
}

/// Emit event: run finalization error (warning level).
pub fn emit_run_finalize_error(run_id: RunId, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}
