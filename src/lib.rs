//! Synthesis: audit-and-anchor for published logic atomics.
//!
//! An *atomic* is a named unit of logic whose specification lives in a content-addressed
//! store and whose integrity record lives on a ledger. Running an atomic resolves its
//! record, refuses obsolete ones, validates the caller's input against the specification's
//! optional JSON Schema, has a panel of critics and a jury score the result, certifies the
//! outcome with a locally computed hash, and anchors the score on the ledger.
//!
//! # Architecture
//!
//! - [`core::pipeline`]: the staged run (RESOLVING → … → DONE | ABORTED) and the
//!   [`LedgerSession`](core::pipeline::LedgerSession) that owns the nonce cursor.
//! - [`core::consensus`]: critic fan-out, jury parsing, bounded integrity score.
//! - [`core::silo`]: pure health classification of a registry record.
//! - [`core::schema`]: JSON Schema extraction and validation.
//! - [`core::certify`]: certified payloads and their SHA-256 certification hash.
//! - [`plugins`]: the ledger, content store and oracle seams with local and remote
//!   implementations.
//!
//! # State
//!
//! Project state lives under `<project>/.synthesis/`: `config.toml` and a `data/`
//! directory holding the local ledger database, content blobs and `audit.events.jsonl`.
//!
//! ```bash
//! synthesis seed
//! synthesis list
//! synthesis run A-GENESIS-01 input.json
//! synthesis sweep
//! ```

mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{Cli, Command};
use crate::core::config::{ContentKind, LedgerKind, SynthesisConfig};
use crate::core::consensus::ConsensusEngine;
use crate::core::error::SynthesisError;
use crate::core::nonce::NonceSource;
use crate::core::pipeline::{AuditPipeline, AuditRequest, LedgerSession, PipelineSettings};
use crate::core::retry::with_retry;
use crate::core::silo;
use crate::core::specdoc::{self, SpecificationDocument};
use crate::core::store::{self, Store};
use crate::core::{time, trace, tui};
use crate::plugins::content_store::{
    ContentStore, ContentTag, GatewayContentStore, LocalContentStore,
};
use crate::plugins::ledger::Ledger;
use crate::plugins::oracle::HttpOracle;
use crate::plugins::rpc_ledger::RpcLedger;
use crate::plugins::sqlite_ledger::SqliteLedger;

use clap::Parser;
use colored::Colorize;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SYNTHESIS_LOG";

/// Install the stderr subscriber. Level comes from `SYNTHESIS_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

struct Runtime {
    project_root: PathBuf,
    store: Store,
    config: SynthesisConfig,
    json: bool,
}

impl Runtime {
    fn open(explicit_config: Option<&Path>, format: &str) -> Result<Self, SynthesisError> {
        let json = match format {
            "json" => true,
            "text" => false,
            other => {
                return Err(SynthesisError::ValidationError(format!(
                    "unknown --format '{}' (expected 'text' or 'json')",
                    other
                )));
            }
        };
        let current_dir = std::env::current_dir()?;
        let project_root = store::find_project_root(&current_dir).unwrap_or(current_dir);
        let config = SynthesisConfig::resolve(explicit_config, &project_root)?;
        let store = Store::for_project(&project_root);
        store.ensure()?;
        Ok(Self {
            project_root,
            store,
            config,
            json,
        })
    }

    fn open_local_ledger(&self) -> Result<SqliteLedger, SynthesisError> {
        let ledger =
            SqliteLedger::open(&self.store.ledger_db_path(), self.config.ledger.strike_threshold)?;
        let account = &self.config.ledger.account;
        if ledger.pending_count(account)? == 0 && ledger.balance(account)? == 0 {
            ledger.credit(account, self.config.ledger.initial_balance)?;
        }
        Ok(ledger)
    }

    fn open_ledger(&self) -> Result<Box<dyn Ledger>, SynthesisError> {
        let ledger: Box<dyn Ledger> = match self.config.ledger.kind {
            LedgerKind::Local => Box::new(self.open_local_ledger()?),
            LedgerKind::Rpc => Box::new(RpcLedger::from_env(
                &self.config.ledger.rpc_url,
                Duration::from_secs(self.config.ledger.timeout_secs),
            )?),
        };
        info!(ledger = %ledger.describe(), "ledger opened");
        Ok(ledger)
    }

    fn open_content(&self) -> Result<Box<dyn ContentStore>, SynthesisError> {
        let content = &self.config.content;
        Ok(match content.kind {
            ContentKind::Local => Box::new(LocalContentStore::new(&self.store.content_dir())),
            ContentKind::Gateway => Box::new(GatewayContentStore::new(
                &content.gateway_url,
                content.upload_url.as_deref(),
                &content.scheme,
                Duration::from_secs(content.timeout_secs),
            )?),
        })
    }

    fn open_oracle(&self) -> Result<HttpOracle, SynthesisError> {
        let oracle = &self.config.oracle;
        HttpOracle::from_env(
            &oracle.endpoint,
            Duration::from_secs(oracle.timeout_secs),
            oracle.stream,
        )
    }

    fn open_session<'a>(&self, ledger: &'a dyn Ledger) -> Result<LedgerSession<'a>, SynthesisError> {
        Ok(
            LedgerSession::open(ledger, PipelineSettings::from_config(&self.config))?
                .with_audit_trail(&self.store.root),
        )
    }

    fn manifest(&self, explicit: Option<&Path>) -> Result<Vec<SpecificationDocument>, SynthesisError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => self.config.manifest_path(&self.project_root),
        };
        specdoc::load_manifest(&path)
    }
}

pub fn run() -> Result<(), SynthesisError> {
    let cli = Cli::parse();
    if let Command::Version = cli.command {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let rt = Runtime::open(cli.config.as_deref(), &cli.format)?;

    match cli.command {
        Command::Run {
            id,
            input,
            bootstrap,
        } => cmd_run(&rt, &id, &input, bootstrap.as_deref()),
        Command::List { manifest } => cmd_list(&rt, manifest.as_deref()),
        Command::Inspect { id } => cmd_inspect(&rt, &id),
        Command::Sweep { ids, manifest } => cmd_sweep(&rt, ids, manifest.as_deref()),
        Command::Seed { manifest } => cmd_seed(&rt, manifest.as_deref()),
        Command::Fund { amount } => cmd_fund(&rt, amount),
        Command::Trail { last } => cmd_trail(&rt, last),
        Command::Version => Ok(()),
    }
}

fn print_json(value: &Value) -> Result<(), SynthesisError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// JSON files are parsed; anything else is handed over as a string.
fn read_input(path: &Path) -> Result<Value, SynthesisError> {
    let text = fs::read_to_string(path).map_err(|e| {
        SynthesisError::ValidationError(format!("cannot read input {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn cmd_run(
    rt: &Runtime,
    id: &str,
    input: &Path,
    bootstrap: Option<&str>,
) -> Result<(), SynthesisError> {
    let payload = read_input(input)?;
    let oracle = rt.open_oracle()?;
    let ledger = rt.open_ledger()?;
    let content = rt.open_content()?;
    let engine = ConsensusEngine::new(
        &oracle,
        rt.config.oracle.models.clone(),
        rt.config.oracle.jurors,
    )?;
    let session = rt.open_session(ledger.as_ref())?;
    let mut pipeline = AuditPipeline::new(session, content.as_ref(), engine);

    let mut request = AuditRequest::execute(id, payload);
    if let Some(pointer) = bootstrap {
        request = request.with_bootstrap(pointer);
    }
    match pipeline.run(&request) {
        Ok(outcome) if rt.json => print_json(&time::command_envelope(
            "run",
            "ok",
            json!({ "outcome": outcome }),
        )),
        Ok(outcome) => {
            tui::render_outcome(&outcome);
            Ok(())
        }
        Err(failure) if rt.json => print_json(&time::command_envelope(
            "run",
            "aborted",
            json!({ "failure": failure.to_json() }),
        )),
        Err(failure) => {
            tui::render_failure(&failure);
            Ok(())
        }
    }
}

fn cmd_list(rt: &Runtime, manifest: Option<&Path>) -> Result<(), SynthesisError> {
    let ledger = rt.open_ledger()?;
    let ids: Vec<String> = match rt.manifest(manifest) {
        Ok(docs) => docs.into_iter().map(|d| d.outcome).collect(),
        Err(SynthesisError::NotFound(msg)) if manifest.is_none() => {
            warn!(%msg, "no manifest; listing ids known to the ledger");
            ledger.known_ids()?
        }
        Err(e) => return Err(e),
    };
    let policy = rt.config.pipeline.retry_policy();

    let mut rows = Vec::new();
    if !rt.json {
        tui::render_box(
            "ATOMIC REGISTRY",
            &format!("{} ids | {}", ids.len(), ledger.describe()),
            tui::BoxStyle::Info,
        );
    }
    for id in &ids {
        match with_retry(policy, "registry.lookup", || ledger.lookup(id)) {
            Ok(record) if !record.is_registered() => {
                if rt.json {
                    rows.push(json!({"id": id, "status": "UNREGISTERED"}));
                } else {
                    println!("   {:<28} {:>8}  {}", id, "--", "UNREGISTERED".dimmed());
                }
            }
            Ok(record) => {
                let (health, reason) = silo::classify_with_reason(&record);
                if rt.json {
                    rows.push(json!({
                        "id": id,
                        "status": health,
                        "score": record.score,
                        "integrity": record.integrity_percent(),
                        "strikes": record.strike_count,
                        "reason": reason,
                    }));
                } else {
                    println!("{}", tui::status_row(id, Some(&record), Some(health)));
                }
            }
            Err(e) => {
                warn!(atomic_id = %id, error = %e, "registry unreachable");
                if rt.json {
                    rows.push(json!({"id": id, "status": "UNREACHABLE", "error": e.to_string()}));
                } else {
                    println!("{}", tui::status_row(id, None, None));
                }
            }
        }
    }
    if rt.json {
        print_json(&time::command_envelope("list", "ok", json!({ "atomics": rows })))?;
    }
    Ok(())
}

fn cmd_inspect(rt: &Runtime, id: &str) -> Result<(), SynthesisError> {
    let ledger = rt.open_ledger()?;
    let policy = rt.config.pipeline.retry_policy();
    let account = &rt.config.ledger.account;
    let record = with_retry(policy, "registry.lookup", || ledger.lookup(id))?;
    let allowance = with_retry(policy, "fee.allowance", || ledger.allowance(account))?;
    let balance = with_retry(policy, "fee.balance", || ledger.balance(account))?;
    let pending = with_retry(policy, "nonce.pending", || ledger.pending_count(account))?;

    if !record.is_registered() {
        return Err(SynthesisError::NotRegistered(id.to_string()));
    }
    let (health, reason) = silo::classify_with_reason(&record);
    if rt.json {
        return print_json(&time::command_envelope(
            "inspect",
            "ok",
            json!({
                "record": record,
                "status": health,
                "reason": reason,
                "account": {"address": account, "allowance": allowance, "balance": balance, "pending_nonce": pending},
            }),
        ));
    }
    tui::render_box(
        &format!("{} {}", health.icon(), id),
        &reason,
        tui::health_style(health),
    );
    println!("  spec      {}", record.spec_pointer);
    println!("  creator   {}", record.creator);
    println!("  score     {} bps ({})", record.score, record.integrity_percent());
    println!("  strikes   {}", record.strike_count);
    println!("  account   {}", account);
    println!("  fees      allowance {} | balance {} | next nonce {}", allowance, balance, pending);
    Ok(())
}

fn cmd_sweep(rt: &Runtime, ids: Vec<String>, manifest: Option<&Path>) -> Result<(), SynthesisError> {
    let ids = if ids.is_empty() {
        rt.manifest(manifest)?
            .into_iter()
            .map(|d| d.outcome)
            .collect()
    } else {
        ids
    };
    let oracle = rt.open_oracle()?;
    let ledger = rt.open_ledger()?;
    let content = rt.open_content()?;
    let engine = ConsensusEngine::new(
        &oracle,
        rt.config.oracle.models.clone(),
        rt.config.oracle.jurors,
    )?;
    let session = rt.open_session(ledger.as_ref())?;
    let mut pipeline = AuditPipeline::new(session, content.as_ref(), engine);

    let requests: Vec<AuditRequest> = ids.iter().map(|id| AuditRequest::sweep(id)).collect();
    let summary = pipeline.run_batch(&requests);
    if rt.json {
        let results: Vec<Value> = summary
            .results
            .iter()
            .map(|r| match r {
                Ok(outcome) => json!({"status": "ok", "outcome": outcome}),
                Err(failure) => json!({"status": "aborted", "failure": failure.to_json()}),
            })
            .collect();
        return print_json(&time::command_envelope(
            "sweep",
            "ok",
            json!({"succeeded": summary.succeeded(), "failed": summary.failed(), "results": results}),
        ));
    }
    for result in &summary.results {
        match result {
            Ok(outcome) => tui::render_outcome(outcome),
            Err(failure) => tui::render_failure(failure),
        }
    }
    tui::render_box(
        "SWEEP COMPLETE",
        &format!("{} sealed | {} aborted", summary.succeeded(), summary.failed()),
        if summary.failed() == 0 {
            tui::BoxStyle::Success
        } else {
            tui::BoxStyle::Warning
        },
    );
    Ok(())
}

fn cmd_seed(rt: &Runtime, manifest: Option<&Path>) -> Result<(), SynthesisError> {
    let documents = rt.manifest(manifest)?;
    let ledger = rt.open_ledger()?;
    let content = rt.open_content()?;
    let mut session = rt.open_session(ledger.as_ref())?;

    let mut rows = Vec::new();
    for doc in &documents {
        let id = doc.outcome.as_str();
        let result = seed_one(&mut session, content.as_ref(), doc);
        let (status, detail) = match &result {
            Ok(Some(pointer)) => ("registered", pointer.clone()),
            Ok(None) => ("skipped", "already registered".to_string()),
            Err(e) => ("failed", e.to_string()),
        };
        if rt.json {
            rows.push(json!({"id": id, "status": status, "detail": detail}));
        } else {
            let line = format!("{:<28} {:<10} {}", id, status, detail);
            match result {
                Ok(Some(_)) => println!("✨ {}", line.green()),
                Ok(None) => println!("⏭  {}", line.dimmed()),
                Err(_) => println!("💥 {}", line.red()),
            }
        }
    }
    if rt.json {
        print_json(&time::command_envelope("seed", "ok", json!({ "atomics": rows })))?;
    }
    Ok(())
}

/// Upload and register one manifest entry. `Ok(None)` when the ledger already knows it.
fn seed_one(
    session: &mut LedgerSession<'_>,
    content: &dyn ContentStore,
    doc: &SpecificationDocument,
) -> Result<Option<String>, SynthesisError> {
    let id = doc.outcome.as_str();
    if session.lookup(id)?.is_registered() {
        return Ok(None);
    }
    let bytes = serde_json::to_vec_pretty(doc)?;
    let pointer = content.put(
        &bytes,
        &[
            ContentTag::new("Content-Type", "application/json"),
            ContentTag::new("App-Name", "synthesis"),
            ContentTag::new("Atomic-Id", id),
        ],
    )?;
    session.register(id, &pointer)?;
    Ok(Some(pointer.to_string()))
}

fn cmd_fund(rt: &Runtime, amount: u64) -> Result<(), SynthesisError> {
    if rt.config.ledger.kind != LedgerKind::Local {
        return Err(SynthesisError::ConfigError(
            "fund only applies to the local ledger".into(),
        ));
    }
    let ledger = rt.open_local_ledger()?;
    let balance = ledger.credit(&rt.config.ledger.account, amount)?;
    if rt.json {
        return print_json(&time::command_envelope(
            "fund",
            "ok",
            json!({"account": rt.config.ledger.account, "balance": balance}),
        ));
    }
    println!("balance {} for {}", balance, rt.config.ledger.account);
    Ok(())
}

fn cmd_trail(rt: &Runtime, last: usize) -> Result<(), SynthesisError> {
    let events = trace::last_events(&rt.store.root, last)?;
    if rt.json {
        return print_json(&time::command_envelope(
            "trail",
            "ok",
            json!({ "events": events }),
        ));
    }
    for event in events {
        println!(
            "{} {:<18} {:<14} {}",
            event.ts.dimmed(),
            event.op,
            event.status,
            event.atomic_id.unwrap_or_default()
        );
    }
    Ok(())
}

