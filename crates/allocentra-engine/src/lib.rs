//! Allocentra Allocation Engine
//!
//! Given a fixed pool of budget and resources and a competing set of
//! requests, the engine computes a deterministic, explainable, auditable
//! allocation decision per request. Runs come in two modes: commit runs
//! apply their results to the pool ledger and request state; scenario runs
//! are hypothetical and never mutate shared state.

pub mod algorithm;
pub mod controller;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod obs;
pub mod queue;
pub mod scoring;
pub mod trace;

pub use algorithm::{allocate, AllocationOutcome, Decision};
pub use controller::{AllocationEngine, EngineConfig, RunOptions};
pub use digest::StateDigest;
pub use error::{EngineError, EngineResult, LedgerError, ValidationError};
pub use ledger::{PoolLedger, PoolSnapshot, PoolView, ReservationSet, ReservationToken};
pub use obs::init_tracing;
pub use queue::{order_requests, validate_requests};
pub use scoring::{ScoreBreakdown, ScoreComponent, ScoringEngine, ScoringWeights};
pub use trace::TraceBuilder;

/// Engine version, stamped into run records and the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
