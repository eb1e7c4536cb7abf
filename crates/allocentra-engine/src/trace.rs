//! Explainability Trace Builder.
//!
//! Accumulates the per-pool reason steps produced while a request is
//! evaluated, in evaluation order, into the `ExplanationTrace` owned by
//! that request's result. Traces are exposed verbatim, never summarized,
//! so a human can reconstruct exactly why a request was limited.

use allocentra_store::{ExplanationTrace, LimitingFactor, PoolId, TraceStep};

/// Append-only builder for one request's explanation trace.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    steps: Vec<TraceStep>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the evaluation of one pool for the owning request.
    pub fn record(
        &mut self,
        pool_id: PoolId,
        available_before: u64,
        requested: u64,
        granted: u64,
        limiting_factor: LimitingFactor,
    ) {
        self.steps.push(TraceStep {
            pool_id,
            available_before,
            requested,
            granted,
            limiting_factor,
        });
    }

    /// Finish the trace, yielding the ordered step sequence.
    pub fn finish(self) -> ExplanationTrace {
        ExplanationTrace { steps: self.steps }
    }
}
