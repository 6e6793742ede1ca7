//! The audit-and-anchor pipeline.
//!
//! One run takes an atomic id through RESOLVING, VALIDATING, SCORING, CERTIFYING and
//! ANCHORING to DONE, or to ABORTED from whichever stage failed. Every transition is
//! written to the audit trail. Ledger submissions go through one [`LedgerSession`], whose
//! [`NonceSequencer`] is seeded once; the failure taxonomy decides whether a failed
//! submission is retried, treated as success, or abandoned.

use crate::core::certify::CertifiedPayload;
use crate::core::config::{AuditMode, SchemaPolicy, SynthesisConfig};
use crate::core::consensus::{ConsensusEngine, ConsensusReport};
use crate::core::error::{FailureClass, SynthesisError, classify_failure};
use crate::core::nonce::NonceSequencer;
use crate::core::retry::{RetryPolicy, with_retry};
use crate::core::schema::{self, ValidationReport};
use crate::core::silo::{self, AtomicRecord, SiloHealth};
use crate::core::specdoc::SpecificationDocument;
use crate::core::trace::{self, AuditEvent};
use crate::plugins::content_store::{ContentStore, Pointer};
use crate::plugins::ledger::{Ledger, LedgerOp, TxReceipt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStage {
    Resolving,
    Validating,
    Scoring,
    Certifying,
    Anchoring,
    Done,
    Aborted,
}

impl AuditStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStage::Resolving => "RESOLVING",
            AuditStage::Validating => "VALIDATING",
            AuditStage::Scoring => "SCORING",
            AuditStage::Certifying => "CERTIFYING",
            AuditStage::Anchoring => "ANCHORING",
            AuditStage::Done => "DONE",
            AuditStage::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for AuditStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub account: String,
    pub creator: String,
    pub schema_policy: SchemaPolicy,
    pub retry: RetryPolicy,
    pub min_allowance: u64,
    pub approve_amount: u64,
}

impl PipelineSettings {
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            account: config.ledger.account.clone(),
            creator: config.ledger.creator().to_string(),
            schema_policy: config.pipeline.schema_policy,
            retry: config.pipeline.retry_policy(),
            min_allowance: config.ledger.min_allowance,
            approve_amount: config.ledger.approve_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRequest {
    pub atomic_id: String,
    pub input: Value,
    pub mode: AuditMode,
    /// Registers the id with this specification pointer when the ledger does not know it.
    pub bootstrap_pointer: Option<String>,
}

impl AuditRequest {
    pub fn execute(atomic_id: &str, input: Value) -> Self {
        Self {
            atomic_id: atomic_id.to_string(),
            input,
            mode: AuditMode::Execute,
            bootstrap_pointer: None,
        }
    }

    pub fn sweep(atomic_id: &str) -> Self {
        Self {
            atomic_id: atomic_id.to_string(),
            input: Value::Null,
            mode: AuditMode::Sweep,
            bootstrap_pointer: None,
        }
    }

    pub fn with_bootstrap(mut self, pointer: &str) -> Self {
        self.bootstrap_pointer = Some(pointer.to_string());
        self
    }
}

/// How a mutating call ended. `AlreadyDone` is success without a consumed sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    Confirmed(TxReceipt),
    AlreadyDone { reason: String },
}

impl Submission {
    pub fn receipt(&self) -> Option<&TxReceipt> {
        match self {
            Submission::Confirmed(r) => Some(r),
            Submission::AlreadyDone { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    pub atomic_id: String,
    pub mode: AuditMode,
    pub stages: Vec<AuditStage>,
    pub health: SiloHealth,
    pub health_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<Submission>,
    pub validation: ValidationReport,
    pub report: ConsensusReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    pub payload: CertifiedPayload,
    pub anchor: Submission,
}

#[derive(Debug)]
pub struct AuditFailure {
    pub atomic_id: String,
    /// Last stage entered before the failure.
    pub stage: AuditStage,
    pub stages: Vec<AuditStage>,
    pub error: SynthesisError,
}

impl AuditFailure {
    pub fn to_json(&self) -> Value {
        json!({
            "atomic_id": self.atomic_id,
            "stage": self.stage,
            "stages": self.stages,
            "error": self.error.to_string(),
        })
    }
}

impl fmt::Display for AuditFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} aborted during {}: {}",
            self.atomic_id, self.stage, self.error
        )
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub results: Vec<Result<AuditOutcome, AuditFailure>>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// The controlling account's view of the ledger: one sequence cursor, fee top-ups, and
/// failure handling for every mutating call.
pub struct LedgerSession<'a> {
    ledger: &'a dyn Ledger,
    sequencer: NonceSequencer,
    settings: PipelineSettings,
    audit_root: Option<PathBuf>,
}

impl<'a> LedgerSession<'a> {
    /// Seeds the sequence cursor from the ledger; this read is not retried.
    pub fn open(ledger: &'a dyn Ledger, settings: PipelineSettings) -> Result<Self, SynthesisError> {
        let sequencer = NonceSequencer::seed(ledger, &settings.account)?;
        Ok(Self {
            ledger,
            sequencer,
            settings,
            audit_root: None,
        })
    }

    /// Append submissions (and, through the pipeline, stage transitions) to
    /// `<store_root>/audit.events.jsonl`.
    pub fn with_audit_trail(mut self, store_root: &Path) -> Self {
        self.audit_root = Some(store_root.to_path_buf());
        self
    }

    pub fn ledger(&self) -> &'a dyn Ledger {
        self.ledger
    }

    pub fn sequencer(&self) -> &NonceSequencer {
        &self.sequencer
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn lookup(&self, atomic_id: &str) -> Result<AtomicRecord, SynthesisError> {
        let ledger = self.ledger;
        with_retry(self.settings.retry, "registry.lookup", || {
            ledger.lookup(atomic_id)
        })
    }

    /// Approve `approve_amount` when the allowance has fallen below `min_allowance`.
    pub fn ensure_allowance(&mut self, atomic_id: &str) -> Result<(), SynthesisError> {
        let ledger = self.ledger;
        let account = self.settings.account.clone();
        let allowance = with_retry(self.settings.retry, "fee.allowance", || {
            ledger.allowance(&account)
        })?;
        if allowance >= self.settings.min_allowance {
            return Ok(());
        }
        let amount = self.settings.approve_amount;
        info!(account = %account, allowance, amount, "fee allowance low; approving");
        self.submit(Some(atomic_id), LedgerOp::Approve, |ledger, account, nonce| {
            ledger.approve(account, amount, nonce)
        })?;
        Ok(())
    }

    pub fn register(
        &mut self,
        atomic_id: &str,
        pointer: &Pointer,
    ) -> Result<Submission, SynthesisError> {
        self.ensure_allowance(atomic_id)?;
        let pointer = pointer.to_string();
        let creator = self.settings.creator.clone();
        self.submit(Some(atomic_id), LedgerOp::Register, |ledger, account, nonce| {
            ledger.register(account, atomic_id, &pointer, &creator, nonce)
        })
    }

    pub fn anchor_score(
        &mut self,
        atomic_id: &str,
        score: u32,
        certification_hash: &str,
    ) -> Result<Submission, SynthesisError> {
        self.ensure_allowance(atomic_id)?;
        self.submit(Some(atomic_id), LedgerOp::AnchorScore, |ledger, account, nonce| {
            ledger.anchor_score(account, atomic_id, score, certification_hash, nonce)
        })
    }

    pub fn issue_strike(&mut self, atomic_id: &str, score: u32) -> Result<Submission, SynthesisError> {
        self.ensure_allowance(atomic_id)?;
        self.submit(Some(atomic_id), LedgerOp::IssueStrike, |ledger, account, nonce| {
            ledger.issue_strike(account, atomic_id, score, nonce)
        })
    }

    /// Issue a sequence number and submit. Transient failures resync, cool down and retry
    /// within the attempt bound, unless the resync shows the number was spent; a rejected
    /// sequence number resyncs and retries once; `AlreadyDone` hands the number back and
    /// counts as success. Nothing is resent once it may have been broadcast.
    pub fn submit<F>(
        &mut self,
        atomic_id: Option<&str>,
        op: LedgerOp,
        call: F,
    ) -> Result<Submission, SynthesisError>
    where
        F: Fn(&dyn Ledger, &str, u64) -> Result<TxReceipt, SynthesisError>,
    {
        let ledger = self.ledger;
        let policy = self.settings.retry;
        let mut transient_failures = 0u32;
        let mut desync_retried = false;
        loop {
            let nonce = self.sequencer.next();
            let err = match call(ledger, &self.settings.account, nonce) {
                Ok(receipt) => {
                    info!(op = op.as_str(), nonce, tx_hash = %receipt.tx_hash, "submission confirmed");
                    self.record(
                        &format!("ledger.{}", op),
                        atomic_id,
                        "confirmed",
                        json!({"nonce": nonce, "tx_hash": receipt.tx_hash}),
                    );
                    return Ok(Submission::Confirmed(receipt));
                }
                Err(err) => err,
            };
            match classify_failure(&err) {
                FailureClass::AlreadyDone => {
                    self.sequencer.release(nonce)?;
                    info!(op = op.as_str(), reason = %err, "already on the ledger");
                    self.record(
                        &format!("ledger.{}", op),
                        atomic_id,
                        "already_done",
                        json!({"nonce": nonce, "reason": err.to_string()}),
                    );
                    return Ok(Submission::AlreadyDone {
                        reason: err.to_string(),
                    });
                }
                FailureClass::Transient => {
                    transient_failures += 1;
                    if self.landed_anyway(nonce) {
                        warn!(op = op.as_str(), nonce, error = %err, "sequence number spent despite failure; not resending");
                        let err = SynthesisError::UnconfirmedBroadcast(format!(
                            "nonce {} consumed after: {}",
                            nonce, err
                        ));
                        return Err(self.rejected(op, atomic_id, nonce, err));
                    }
                    if transient_failures >= policy.max_attempts {
                        return Err(self.rejected(op, atomic_id, nonce, err));
                    }
                    warn!(
                        op = op.as_str(),
                        nonce,
                        attempt = transient_failures,
                        error = %err,
                        "transient submission failure; cooling down"
                    );
                    thread::sleep(policy.cooldown);
                }
                FailureClass::Unconfirmed => {
                    warn!(op = op.as_str(), nonce, error = %err, "outcome unknown; not resending");
                    if let Err(e) = self.sequencer.resync(ledger) {
                        warn!(error = %e, "resync failed; cursor stays past the broadcast number");
                    }
                    return Err(self.rejected(op, atomic_id, nonce, err));
                }
                FailureClass::NonceDesync if !desync_retried => {
                    desync_retried = true;
                    warn!(op = op.as_str(), nonce, error = %err, "sequence number rejected; resyncing");
                    self.sequencer.resync(ledger)?;
                }
                FailureClass::NonceDesync | FailureClass::Fatal => {
                    self.recover_cursor(nonce);
                    return Err(self.rejected(op, atomic_id, nonce, err));
                }
            }
        }
    }

    /// Resync after a transient failure and report whether the ledger consumed `nonce`
    /// anyway. If the ledger cannot be reached, the number is handed back as never landed.
    fn landed_anyway(&mut self, nonce: u64) -> bool {
        match self.sequencer.resync(self.ledger) {
            Ok(pending) => pending > nonce,
            Err(e) => {
                warn!(error = %e, "resync failed; releasing unconfirmed sequence number");
                if let Err(e) = self.sequencer.release(nonce) {
                    warn!(error = %e, "sequence cursor left as is");
                }
                false
            }
        }
    }

    /// Replace the local cursor with the ledger's view; if the ledger cannot be reached,
    /// at least hand back the number that never landed.
    fn recover_cursor(&mut self, nonce: u64) {
        if let Err(e) = self.sequencer.resync(self.ledger) {
            warn!(error = %e, "resync failed; releasing unconfirmed sequence number");
            if let Err(e) = self.sequencer.release(nonce) {
                warn!(error = %e, "sequence cursor left as is");
            }
        }
    }

    fn rejected(
        &self,
        op: LedgerOp,
        atomic_id: Option<&str>,
        nonce: u64,
        err: SynthesisError,
    ) -> SynthesisError {
        self.record(
            &format!("ledger.{}", op),
            atomic_id,
            "failed",
            json!({"nonce": nonce, "error": err.to_string()}),
        );
        err
    }

    pub(crate) fn record(&self, op: &str, atomic_id: Option<&str>, status: &str, detail: Value) {
        let Some(root) = &self.audit_root else {
            return;
        };
        if let Err(e) = trace::append_event(root, AuditEvent::new(op, atomic_id, status, detail)) {
            warn!(op, error = %e, "audit trail write failed");
        }
    }
}

pub struct AuditPipeline<'a> {
    session: LedgerSession<'a>,
    content: &'a dyn ContentStore,
    engine: ConsensusEngine<'a>,
}

impl<'a> AuditPipeline<'a> {
    pub fn new(
        session: LedgerSession<'a>,
        content: &'a dyn ContentStore,
        engine: ConsensusEngine<'a>,
    ) -> Self {
        Self {
            session,
            content,
            engine,
        }
    }

    pub fn session(&self) -> &LedgerSession<'a> {
        &self.session
    }

    pub fn sequencer(&self) -> &NonceSequencer {
        self.session.sequencer()
    }

    pub fn run(&mut self, request: &AuditRequest) -> Result<AuditOutcome, AuditFailure> {
        let mut stages = Vec::new();
        match self.run_stages(request, &mut stages) {
            Ok(mut outcome) => {
                outcome.stages = stages;
                Ok(outcome)
            }
            Err(err) => {
                let stage = stages.last().copied().unwrap_or(AuditStage::Resolving);
                stages.push(AuditStage::Aborted);
                error!(atomic_id = %request.atomic_id, stage = %stage, error = %err, "audit aborted");
                self.session.record(
                    "pipeline.stage",
                    Some(&request.atomic_id),
                    AuditStage::Aborted.as_str(),
                    json!({"failed_stage": stage, "error": err.to_string()}),
                );
                Err(AuditFailure {
                    atomic_id: request.atomic_id.clone(),
                    stage,
                    stages,
                    error: err,
                })
            }
        }
    }

    /// Runs every request in order. A failed id never stops the batch.
    pub fn run_batch(&mut self, requests: &[AuditRequest]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for request in requests {
            summary.results.push(self.run(request));
        }
        info!(
            total = summary.results.len(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "batch complete"
        );
        summary
    }

    fn run_stages(
        &mut self,
        request: &AuditRequest,
        stages: &mut Vec<AuditStage>,
    ) -> Result<AuditOutcome, SynthesisError> {
        let id = request.atomic_id.as_str();
        if id.trim().is_empty() {
            return Err(SynthesisError::ValidationError("atomic id is empty".into()));
        }
        let content = self.content;

        self.enter(id, stages, AuditStage::Resolving);
        let mut record = self.session.lookup(id)?;
        let mut registration = None;
        if !record.is_registered() {
            let Some(raw_pointer) = request.bootstrap_pointer.as_deref() else {
                return Err(SynthesisError::NotRegistered(id.to_string()));
            };
            let pointer = Pointer::parse_with_default(raw_pointer, content.scheme())?;
            info!(atomic_id = id, pointer = %pointer, "bootstrapping registration");
            registration = Some(self.session.register(id, &pointer)?);
            record = self.session.lookup(id)?;
            if !record.is_registered() {
                return Err(SynthesisError::NotRegistered(id.to_string()));
            }
        }
        let (health, health_reason) = silo::classify_with_reason(&record);
        if !health.permits_execution() {
            return Err(SynthesisError::ObsoleteAtomic(id.to_string()));
        }

        self.enter(id, stages, AuditStage::Validating);
        let policy = self.session.settings().retry;
        let bytes = with_retry(policy, "content.fetch", || content.fetch(&record.spec_pointer))?;
        let document = SpecificationDocument::from_bytes(id, &bytes)?;
        let validation = match request.mode {
            AuditMode::Execute => {
                let input_schema = schema::extract(&document.details);
                schema::validate(input_schema.as_ref(), &request.input)
            }
            AuditMode::Sweep => schema::validate(None, &request.input),
        };
        if !validation.ok {
            warn!(atomic_id = id, errors = ?validation.errors, "input failed schema validation");
            self.session.record(
                "schema.validate",
                Some(id),
                validation.mode.to_string().as_str(),
                json!({"errors": validation.errors}),
            );
            if self.session.settings().schema_policy == SchemaPolicy::Fatal {
                return Err(SynthesisError::SchemaValidationFailure(
                    validation.errors.clone(),
                ));
            }
        }

        self.enter(id, stages, AuditStage::Scoring);
        let (report, candidate, mut fields) = match request.mode {
            AuditMode::Execute => {
                let execution = self.engine.execute(&document, &request.input)?;
                (
                    execution.consensus,
                    Some(execution.candidate),
                    execution.reconciled,
                )
            }
            AuditMode::Sweep => {
                let report = self.engine.score(&document.oracle_context(), None)?;
                (report, None, Map::new())
            }
        };
        self.session.record(
            "oracle.consensus",
            Some(id),
            "ok",
            json!({
                "findings": report.findings,
                "jury": report.jury,
                "final_score": report.final_score,
            }),
        );

        self.enter(id, stages, AuditStage::Certifying);
        fields.insert("auditMode".to_string(), json!(request.mode.as_str()));
        fields.insert("jurorCount".to_string(), json!(report.jury.len()));
        let payload = CertifiedPayload::certify(id, report.final_score, fields)?;

        self.enter(id, stages, AuditStage::Anchoring);
        let anchor = match request.mode {
            AuditMode::Execute => {
                self.session
                    .anchor_score(id, report.final_score, &payload.certification_hash)?
            }
            AuditMode::Sweep => self.session.issue_strike(id, report.final_score)?,
        };

        self.enter(id, stages, AuditStage::Done);
        Ok(AuditOutcome {
            atomic_id: id.to_string(),
            mode: request.mode,
            stages: Vec::new(),
            health,
            health_reason,
            registration,
            validation,
            report,
            candidate,
            payload,
            anchor,
        })
    }

    fn enter(&self, atomic_id: &str, stages: &mut Vec<AuditStage>, stage: AuditStage) {
        stages.push(stage);
        info!(atomic_id, stage = stage.as_str(), "stage");
        self.session
            .record("pipeline.stage", Some(atomic_id), stage.as_str(), Value::Null);
    }
}
