//! Request Queue — validation and deterministic ordering.
//!
//! Ordering is the fairness contract of the whole engine: requests are
//! evaluated by (priority asc, submission time asc, id asc). The order is
//! total and stable, so repeated calls on the same input produce
//! byte-identical orderings — required for deterministic scenario replay.

use allocentra_store::{Cycle, Request};

use crate::error::ValidationError;

/// Validate a single request against its cycle.
///
/// Rejects:
/// - `EmptyRequest` — zero quantity requested from every pool;
/// - `CrossCycleReference` — a pool reference outside the request's cycle.
pub fn validate_request(cycle: &Cycle, request: &Request) -> Result<(), ValidationError> {
    if request.amounts.values().all(|&qty| qty == 0) {
        return Err(ValidationError::EmptyRequest {
            request_id: request.id,
        });
    }
    for (&pool_id, _) in &request.amounts {
        if !cycle.owns_pool(pool_id) {
            return Err(ValidationError::CrossCycleReference {
                request_id: request.id,
                pool_id,
            });
        }
    }
    Ok(())
}

/// Validate a batch of requests; the first offending request aborts.
pub fn validate_requests(cycle: &Cycle, requests: &[Request]) -> Result<(), ValidationError> {
    for request in requests {
        validate_request(cycle, request)?;
    }
    Ok(())
}

/// Order requests by (priority asc, submitted_at asc, id asc).
pub fn order_requests(mut requests: Vec<Request>) -> Vec<Request> {
    requests.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    requests
}
