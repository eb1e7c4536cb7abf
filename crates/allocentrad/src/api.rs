//! HTTP API: routes, request/response bodies, and error mapping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use allocentra_engine::{AllocationEngine, EngineConfig, EngineError, RunOptions};
use allocentra_store::{
    AllocationPolicy, AuditCursor, AuditEntry, AuditEntryId, AuditLog, AuditQuery, Cycle, CycleId,
    CycleStatus, CycleStore, Impact, MemoryAuditLog, MemoryCycleStore, MemoryRequestStore,
    MemoryRunStore, Pool, PoolId, PoolKind, Request, RequestId, RequestStatus, RequestStore, Risk,
    RunId, RunMode, RunRecord, RunStore, StoreError,
};

/// Shared application state: the engine plus direct store handles for
/// read endpoints.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AllocationEngine>,
    pub cycles: Arc<MemoryCycleStore>,
    pub requests: Arc<MemoryRequestStore>,
    pub runs: Arc<MemoryRunStore>,
    pub audit: Arc<MemoryAuditLog>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        let cycles = Arc::new(MemoryCycleStore::new());
        let requests = Arc::new(MemoryRequestStore::new());
        let runs = Arc::new(MemoryRunStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let engine = Arc::new(AllocationEngine::new(
            config,
            cycles.clone(),
            requests.clone(),
            runs.clone(),
            audit.clone(),
        ));
        Self {
            engine,
            cycles,
            requests,
            runs,
            audit,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(health))
        .route("/cycles", post(create_cycle).get(list_cycles))
        .route("/cycles/:cycle_id", get(get_cycle))
        .route("/cycles/:cycle_id/status", post(set_cycle_status))
        .route(
            "/cycles/:cycle_id/pools/:pool_id/capacity",
            post(set_pool_capacity),
        )
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/:request_id", get(get_request))
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/:run_id", get(get_run))
        .route("/audit", get(query_audit))
        .layer(cors)
        .with_state(state)
}

// ----------------------------------------------------------------------
// Error mapping
// ----------------------------------------------------------------------

/// Wraps engine errors for HTTP responses. Held commit locks answer 423
/// with a Retry-After hint; capacity and lifecycle conflicts answer 409.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(EngineError::Store(err))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Ledger(allocentra_engine::LedgerError::InsufficientCapacity {
                ..
            }) => StatusCode::CONFLICT,
            EngineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::CycleNotRunnable { .. } | EngineError::CycleClosed { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::LockHeld { .. } => StatusCode::LOCKED,
            EngineError::Timeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Store(err) => match err {
                StoreError::CycleNotFound(_)
                | StoreError::PoolNotFound(_)
                | StoreError::RequestNotFound(_)
                | StoreError::RunNotFound(_) => StatusCode::NOT_FOUND,
                StoreError::InvalidCycleTransition { .. }
                | StoreError::RunAlreadyFinished { .. } => StatusCode::CONFLICT,
                StoreError::Serialization(_) | StoreError::Backend(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.0.to_string() }));
        let mut response = (status, body).into_response();
        if matches!(self.0, EngineError::LockHeld { .. }) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}

// ----------------------------------------------------------------------
// Request bodies and query parameters
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolBody {
    pub kind: PoolKind,
    pub name: String,
    pub unit: String,
    pub capacity: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCycleBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_actor")]
    pub created_by: String,
    #[serde(default)]
    pub pools: Vec<CreatePoolBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub cycle_id: CycleId,
    pub requester: String,
    pub title: String,
    #[serde(default)]
    pub justification: Option<String>,
    pub amounts: BTreeMap<PoolId, u64>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub dependencies: Vec<RequestId>,
    #[serde(default)]
    pub urgency_deadline: Option<NaiveDate>,
    #[serde(default)]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub risk: Option<Risk>,
    #[serde(default)]
    pub strategic: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunBody {
    pub cycle_id: CycleId,
    pub mode: RunMode,
    #[serde(default)]
    pub policy: Option<AllocationPolicy>,
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatusBody {
    pub status: CycleStatus,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCapacityBody {
    pub capacity: u64,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleListParams {
    pub status: Option<CycleStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestListParams {
    pub cycle_id: CycleId,
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListParams {
    pub cycle_id: CycleId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditParams {
    pub cycle_id: CycleId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Cursor: resume strictly after this (timestamp, id) pair. Both
    /// halves must be supplied together.
    pub after_timestamp: Option<DateTime<Utc>>,
    pub after_id: Option<AuditEntryId>,
    pub limit: Option<usize>,
}

impl AuditParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(100).clamp(1, 1_000)
    }
}

fn default_actor() -> String {
    "api".to_string()
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "allocentrad",
        "version": allocentra_engine::VERSION,
    }))
}

async fn create_cycle(
    State(app): State<AppState>,
    Json(body): Json<CreateCycleBody>,
) -> Result<(StatusCode, Json<Cycle>), ApiError> {
    let mut cycle = Cycle::new(body.name, body.start_date, body.end_date, body.created_by);
    cycle.description = body.description;
    for pool in body.pools {
        cycle.pools.push(Pool {
            id: PoolId::new(),
            cycle_id: cycle.id,
            kind: pool.kind,
            name: pool.name,
            unit: pool.unit,
            capacity: pool.capacity,
            committed: 0,
        });
    }
    let cycle = app.engine.create_cycle(cycle).await?;
    Ok((StatusCode::CREATED, Json(cycle)))
}

async fn list_cycles(
    State(app): State<AppState>,
    Query(params): Query<CycleListParams>,
) -> Result<Json<Vec<Cycle>>, ApiError> {
    Ok(Json(app.cycles.list(params.status).await?))
}

async fn get_cycle(
    State(app): State<AppState>,
    Path(cycle_id): Path<CycleId>,
) -> Result<Json<Cycle>, ApiError> {
    Ok(Json(app.cycles.get(cycle_id).await?))
}

async fn set_cycle_status(
    State(app): State<AppState>,
    Path(cycle_id): Path<CycleId>,
    Json(body): Json<SetStatusBody>,
) -> Result<Json<Cycle>, ApiError> {
    let cycle = app
        .engine
        .set_cycle_status(cycle_id, body.status, body.actor)
        .await?;
    Ok(Json(cycle))
}

async fn set_pool_capacity(
    State(app): State<AppState>,
    Path((cycle_id, pool_id)): Path<(CycleId, PoolId)>,
    Json(body): Json<SetCapacityBody>,
) -> Result<Json<Cycle>, ApiError> {
    let cycle = app
        .engine
        .set_pool_capacity(cycle_id, pool_id, body.capacity, body.actor)
        .await?;
    Ok(Json(cycle))
}

async fn create_request(
    State(app): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    let mut request = Request::new(body.cycle_id, body.requester, body.title);
    request.justification = body.justification;
    request.amounts = body.amounts;
    request.dependencies = body.dependencies;
    request.urgency_deadline = body.urgency_deadline;
    if let Some(priority) = body.priority {
        request.priority = priority;
    }
    if let Some(impact) = body.impact {
        request.impact = impact;
    }
    if let Some(risk) = body.risk {
        request.risk = risk;
    }
    if let Some(strategic) = body.strategic {
        request.strategic = strategic;
    }
    let request = app.engine.submit_request(request).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(app): State<AppState>,
    Query(params): Query<RequestListParams>,
) -> Result<Json<Vec<Request>>, ApiError> {
    // 404 for an unknown cycle rather than an empty list.
    app.cycles.get(params.cycle_id).await?;
    Ok(Json(app.requests.list(params.cycle_id, params.status).await?))
}

async fn get_request(
    State(app): State<AppState>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<Request>, ApiError> {
    Ok(Json(app.requests.get(request_id).await?))
}

async fn start_run(
    State(app): State<AppState>,
    Json(body): Json<StartRunBody>,
) -> Result<(StatusCode, Json<RunRecord>), ApiError> {
    let mut opts = RunOptions::new(body.mode, body.actor);
    if let Some(policy) = body.policy {
        opts.policy = policy;
    }
    opts.timeout = body.timeout_ms.map(Duration::from_millis);
    let run = app.engine.start_run(body.cycle_id, opts).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn list_runs(
    State(app): State<AppState>,
    Query(params): Query<RunListParams>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    app.cycles.get(params.cycle_id).await?;
    Ok(Json(app.runs.list(params.cycle_id).await?))
}

async fn get_run(
    State(app): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<RunRecord>, ApiError> {
    Ok(Json(app.runs.get(run_id).await?))
}

async fn query_audit(
    State(app): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    app.cycles.get(params.cycle_id).await?;
    let after = match (params.after_timestamp, params.after_id) {
        (Some(timestamp), Some(id)) => Some(AuditCursor { timestamp, id }),
        _ => None,
    };
    let query = AuditQuery {
        cycle_id: params.cycle_id,
        from: params.from,
        to: params.to,
        after,
        limit: Some(params.limit()),
    };
    Ok(Json(app.audit.query(query).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocentra_engine::ValidationError;

    fn status_of(err: EngineError) -> StatusCode {
        ApiError(err).status()
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            status_of(EngineError::Validation(ValidationError::InvalidPolicy {
                reason: "bad".to_string()
            })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(EngineError::Store(StoreError::CycleNotFound(CycleId::new()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(EngineError::CycleNotRunnable {
                cycle_id: CycleId::new(),
                status: CycleStatus::Draft,
                mode: RunMode::Commit,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(EngineError::LockHeld {
                cycle_id: CycleId::new()
            }),
            StatusCode::LOCKED
        );
    }

    #[test]
    fn lock_held_sets_retry_after() {
        let response = ApiError(EngineError::LockHeld {
            cycle_id: CycleId::new(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &header::HeaderValue::from_static("1")
        );
    }

    #[test]
    fn run_body_defaults() {
        let cycle_id = CycleId::new();
        let body: StartRunBody = serde_json::from_value(json!({
            "cycleId": cycle_id,
            "mode": "SCENARIO",
        }))
        .unwrap();
        assert_eq!(body.cycle_id, cycle_id);
        assert_eq!(body.mode, RunMode::Scenario);
        assert!(body.policy.is_none());
        assert_eq!(body.actor, "api");
        assert!(body.timeout_ms.is_none());
    }

    #[test]
    fn create_cycle_body_parses_pools() {
        let body: CreateCycleBody = serde_json::from_str(
            r#"{
                "name": "Q3 2026",
                "startDate": "2026-07-01",
                "endDate": "2026-10-01",
                "pools": [
                    { "kind": "BUDGET", "name": "Opex", "unit": "USD", "capacity": 100000 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(body.pools.len(), 1);
        assert_eq!(body.pools[0].capacity, 100_000);
        assert_eq!(body.created_by, "api");
    }

    #[test]
    fn audit_params_limit_clamps() {
        let params = AuditParams {
            cycle_id: CycleId::new(),
            from: None,
            to: None,
            after_timestamp: None,
            after_id: None,
            limit: Some(50_000),
        };
        assert_eq!(params.limit(), 1_000);
    }
}
