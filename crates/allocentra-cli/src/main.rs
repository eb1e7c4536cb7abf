//! Allocentra CLI
//!
//! Runs the allocation engine against JSON fixture files, entirely
//! in-process — no daemon needed. Useful for planning sessions and for
//! inspecting how a request set would be decided.
//!
//! ## Commands
//!
//! - `simulate`: scenario-run a fixture and print the decisions
//! - `score`: print the diagnostic score breakdown per request
//!
//! Fixtures reference pools and dependencies by name/title so they can be
//! written by hand; see [`Fixture`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::Level;

use allocentra_engine::{
    init_tracing, AllocationEngine, EngineConfig, RunOptions, ScoringEngine,
};
use allocentra_store::{
    AllocationPolicy, Cycle, CycleStatus, Impact, LimitingFactor, MemoryAuditLog,
    MemoryCycleStore, MemoryRequestStore, MemoryRunStore, Pool, PoolId, PoolKind, Request,
    RequestId, Risk, RunMode, RunRecord,
};

#[derive(Parser)]
#[command(name = "allocentra")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Allocation engine simulator and scorer", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scenario-run a fixture file and print the allocation decisions
    Simulate {
        /// Fixture file (JSON: cycle, pools, requests)
        file: PathBuf,

        /// Deny requests that cannot be fully satisfied
        #[arg(long)]
        no_partial: bool,

        /// Per-request cap as a fraction of each pool's capacity (0, 1]
        #[arg(long)]
        per_pool_cap: Option<f64>,

        /// Print the per-pool explanation trace under each decision
        #[arg(long)]
        trace: bool,

        /// Emit the full run record as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the diagnostic score breakdown for each request in a fixture
    Score {
        /// Fixture file (JSON: cycle, pools, requests)
        file: PathBuf,

        /// Evaluation date for urgency (default: today)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

// ----------------------------------------------------------------------
// Fixture format
// ----------------------------------------------------------------------

/// Hand-writable scenario input. Pools are referenced by `name` from the
/// requests' `amounts`, dependencies by the target request's `title`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixture {
    cycle: FixtureCycle,
    #[serde(default)]
    requests: Vec<FixtureRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureCycle {
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    pools: Vec<FixturePool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixturePool {
    kind: PoolKind,
    name: String,
    unit: String,
    capacity: u64,
    #[serde(default)]
    committed: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureRequest {
    #[serde(default = "default_requester")]
    requester: String,
    title: String,
    /// Requested quantity per pool name.
    amounts: BTreeMap<String, u64>,
    #[serde(default)]
    priority: Option<u32>,
    /// Titles of requests that must be fully allocated first.
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    urgency_deadline: Option<NaiveDate>,
    #[serde(default)]
    impact: Option<Impact>,
    #[serde(default)]
    risk: Option<Risk>,
    #[serde(default)]
    strategic: Option<u8>,
}

fn default_requester() -> String {
    "cli".to_string()
}

/// A fixture resolved into domain records, with the name maps needed to
/// print human-readable output.
#[derive(Debug)]
struct ResolvedFixture {
    cycle: Cycle,
    requests: Vec<Request>,
    pool_names: HashMap<PoolId, String>,
    request_titles: HashMap<RequestId, String>,
}

fn load_fixture(path: &Path) -> Result<ResolvedFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse fixture {}", path.display()))?;
    resolve_fixture(fixture)
}

fn resolve_fixture(fixture: Fixture) -> Result<ResolvedFixture> {
    let mut cycle = Cycle::new(
        fixture.cycle.name,
        fixture.cycle.start_date,
        fixture.cycle.end_date,
        "cli".to_string(),
    );

    let mut pool_ids: HashMap<String, PoolId> = HashMap::new();
    let mut pool_names: HashMap<PoolId, String> = HashMap::new();
    for pool in fixture.cycle.pools {
        if pool_ids.contains_key(&pool.name) {
            bail!("duplicate pool name: {}", pool.name);
        }
        let record = Pool {
            id: PoolId::new(),
            cycle_id: cycle.id,
            kind: pool.kind,
            name: pool.name.clone(),
            unit: pool.unit,
            capacity: pool.capacity,
            committed: pool.committed,
        };
        pool_ids.insert(pool.name.clone(), record.id);
        pool_names.insert(record.id, pool.name);
        cycle.pools.push(record);
    }

    let mut request_ids: HashMap<String, RequestId> = HashMap::new();
    let mut request_titles: HashMap<RequestId, String> = HashMap::new();
    let mut requests = Vec::new();
    for (index, spec) in fixture.requests.into_iter().enumerate() {
        if request_ids.contains_key(&spec.title) {
            bail!("duplicate request title: {}", spec.title);
        }
        let mut request = Request::new(cycle.id, spec.requester, spec.title.clone());
        for (pool_name, qty) in spec.amounts {
            let pool_id = pool_ids
                .get(&pool_name)
                .with_context(|| format!("request '{}': unknown pool '{pool_name}'", spec.title))?;
            request.amounts.insert(*pool_id, qty);
        }
        for dep_title in spec.dependencies {
            let dep_id = request_ids.get(&dep_title).with_context(|| {
                format!(
                    "request '{}': dependency '{dep_title}' must be declared earlier in the file",
                    spec.title
                )
            })?;
            request.dependencies.push(*dep_id);
        }
        if let Some(priority) = spec.priority {
            request.priority = priority;
        }
        request.urgency_deadline = spec.urgency_deadline;
        if let Some(impact) = spec.impact {
            request.impact = impact;
        }
        if let Some(risk) = spec.risk {
            request.risk = risk;
        }
        if let Some(strategic) = spec.strategic {
            request.strategic = strategic;
        }
        // Fixture order breaks submission-time ties deterministically.
        request.submitted_at = Utc::now() + chrono::Duration::milliseconds(index as i64);

        request_ids.insert(spec.title.clone(), request.id);
        request_titles.insert(request.id, spec.title);
        requests.push(request);
    }

    Ok(ResolvedFixture {
        cycle,
        requests,
        pool_names,
        request_titles,
    })
}

// ----------------------------------------------------------------------
// Entry point
// ----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Simulate {
            file,
            no_partial,
            per_pool_cap,
            trace,
            json,
        } => {
            let policy = AllocationPolicy {
                partial_allocation_allowed: !no_partial,
                per_pool_cap,
            };
            cmd_simulate(&file, policy, trace, json).await
        }
        Commands::Score { file, as_of, json } => cmd_score(&file, as_of, json),
    }
}

async fn cmd_simulate(file: &Path, policy: AllocationPolicy, trace: bool, json: bool) -> Result<()> {
    let fixture = load_fixture(file)?;

    let cycles = Arc::new(MemoryCycleStore::new());
    let requests = Arc::new(MemoryRequestStore::new());
    let runs = Arc::new(MemoryRunStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let engine = Arc::new(AllocationEngine::new(
        EngineConfig::default(),
        cycles,
        requests,
        runs,
        audit,
    ));

    let cycle = engine.create_cycle(fixture.cycle.clone()).await?;
    engine
        .set_cycle_status(cycle.id, CycleStatus::Active, "cli")
        .await?;
    for request in &fixture.requests {
        engine.submit_request(request.clone()).await?;
    }

    let opts = RunOptions::new(RunMode::Scenario, "cli").with_policy(policy);
    let run = engine.execute_run(cycle.id, opts).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    print_run(&run, &fixture, trace);
    Ok(())
}

fn print_run(run: &RunRecord, fixture: &ResolvedFixture, trace: bool) {
    println!(
        "run {}  mode={:?}  status={:?}  snapshot={}",
        run.id,
        run.mode,
        run.status,
        &run.snapshot_digest[..12.min(run.snapshot_digest.len())]
    );
    println!();
    println!("{:>4}  {:<9}  {:>6}  {:<28}  granted", "rank", "decision", "score", "request");

    for result in &run.results {
        let title = fixture
            .request_titles
            .get(&result.request_id)
            .map(String::as_str)
            .unwrap_or("?");
        let granted = if result.granted.is_empty() {
            "-".to_string()
        } else {
            result
                .granted
                .iter()
                .map(|(pool_id, qty)| {
                    let name = fixture
                        .pool_names
                        .get(pool_id)
                        .map(String::as_str)
                        .unwrap_or("?");
                    format!("{name}={qty}")
                })
                .collect::<Vec<_>>()
                .join(" ")
        };
        println!(
            "{:>4}  {:<9}  {:>6.2}  {:<28}  {}",
            result.rank,
            format!("{:?}", result.decision).to_uppercase(),
            result.score,
            truncate(title, 28),
            granted
        );
        if trace {
            println!("      reason: {}", result.reason);
            for step in &result.trace.steps {
                let name = fixture
                    .pool_names
                    .get(&step.pool_id)
                    .map(String::as_str)
                    .unwrap_or("?");
                println!(
                    "      {name}: available={} requested={} granted={}{}",
                    step.available_before,
                    step.requested,
                    step.granted,
                    match step.limiting_factor {
                        LimitingFactor::None => String::new(),
                        other => format!("  limited by {other:?}"),
                    }
                );
            }
        }
    }

    if let Some(summary) = &run.summary {
        println!();
        println!(
            "{} requests: {} allocated, {} partial, {} denied ({} ms)",
            summary.total_requests,
            summary.allocated,
            summary.partial,
            summary.denied,
            summary.duration_ms
        );
        for pool in &fixture.cycle.pools {
            let granted = summary.granted_per_pool.get(&pool.id).copied().unwrap_or(0);
            println!(
                "  {}: {granted}/{} {} granted, {} left",
                pool.name,
                pool.remaining(),
                pool.unit,
                pool.remaining() - granted
            );
        }
    }
}

fn cmd_score(file: &Path, as_of: Option<NaiveDate>, json: bool) -> Result<()> {
    let fixture = load_fixture(file)?;
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
    let scoring = ScoringEngine::default();

    if json {
        let breakdowns: Vec<serde_json::Value> = fixture
            .requests
            .iter()
            .map(|request| {
                let breakdown = scoring.score(request, as_of);
                serde_json::json!({
                    "title": request.title,
                    "breakdown": breakdown,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&breakdowns)?);
        return Ok(());
    }

    println!("scores as of {as_of}");
    println!(
        "{:<28}  {:>6}  {:>5}  {:>5}  {:>5}  {:>5}  {:>5}",
        "request", "total", "prio", "urg", "imp", "risk", "strat"
    );
    for request in &fixture.requests {
        let b = scoring.score(request, as_of);
        println!(
            "{:<28}  {:>6.2}  {:>5.1}  {:>5.1}  {:>5.1}  {:>5.1}  {:>5.1}",
            truncate(&request.title, 28),
            b.total,
            b.priority.value,
            b.urgency.value,
            b.impact.value,
            b.risk.value,
            b.strategic.value
        );
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
