//! Multi-critic consensus scoring.
//!
//! A fixed panel of critics reviews the specification (and, in execute mode, a candidate
//! output) concurrently. A jury turns their findings into one severity score per juror; the
//! integrity score is derived locally from the jury mean. The oracle is never trusted to do
//! arithmetic.

use crate::core::error::SynthesisError;
use crate::core::json_extract::{first_json_object, integer_field};
use crate::core::silo::MAX_BPS;
use crate::core::specdoc::SpecificationDocument;
use crate::plugins::oracle::{ChatMessage, ChatRequest, ScoringOracle};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

pub const JURY_SCORE_MIN: i64 = 1;
pub const JURY_SCORE_MAX: i64 = 100;
/// Each point of mean jury severity costs this many bps.
pub const SEVERITY_WEIGHT: f64 = 20.0;
pub const DEFAULT_JURORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticRole {
    pub label: &'static str,
    pub system_prompt: &'static str,
}

pub const CRITIC_PANEL: [CriticRole; 4] = [
    CriticRole {
        label: "drift",
        system_prompt: "SRE auditor. Audit for logic drift and operational toil.",
    },
    CriticRole {
        label: "security",
        system_prompt: "Security architect. Audit for structural leakage and unsafe trust boundaries.",
    },
    CriticRole {
        label: "economy",
        system_prompt: "Economist. Audit for royalty arbitrage and misaligned incentives.",
    },
    CriticRole {
        label: "structure",
        system_prompt: "Technical architect. Audit for structural integrity.",
    },
];

/// Model name per oracle role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRoster {
    pub critic: String,
    pub jury: String,
    pub brain: String,
    pub reconciler: String,
}

impl Default for ModelRoster {
    fn default() -> Self {
        Self {
            critic: "grok-4.1-fast-non-reasoning".to_string(),
            jury: "grok-4.1-fast-reasoning".to_string(),
            brain: "grok-4.1-fast-reasoning".to_string(),
            reconciler: "grok-4.1-fast-reasoning".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriticFinding {
    pub critic: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JurorScore {
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusReport {
    pub findings: Vec<CriticFinding>,
    pub jury: Vec<JurorScore>,
    pub mean_severity: f64,
    pub final_score: u32,
}

/// Execute-mode result: the brain's candidate, its audit, and the reconciled fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub candidate: String,
    pub consensus: ConsensusReport,
    pub reconciled: Map<String, Value>,
}

/// `clamp(10000 - round(mean * 20), 0, 10000)`.
pub fn final_score(mean_severity: f64) -> u32 {
    let penalty = (mean_severity * SEVERITY_WEIGHT).round();
    let raw = MAX_BPS as f64 - penalty;
    raw.clamp(0.0, MAX_BPS as f64) as u32
}

pub fn mean_severity(jury: &[JurorScore]) -> f64 {
    if jury.is_empty() {
        return 0.0;
    }
    jury.iter().map(|j| j.score as f64).sum::<f64>() / jury.len() as f64
}

/// Parse `{"jury": [{"score": int, "verdict"?: string}, ...]}` out of oracle text.
/// Every juror must carry an integer score in `[1, 100]`.
pub fn parse_jury(text: &str) -> Result<Vec<JurorScore>, SynthesisError> {
    let object = first_json_object(text).ok_or_else(|| {
        SynthesisError::OracleOutputMalformed("jury output contains no JSON object".into())
    })?;
    let entries = object
        .get("jury")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            SynthesisError::OracleOutputMalformed("jury output has no non-empty 'jury' array".into())
        })?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let juror = entry.as_object().ok_or_else(|| {
                SynthesisError::OracleOutputMalformed(format!("juror {} is not an object", i))
            })?;
            let score = integer_field(juror, "score")
                .filter(|s| (JURY_SCORE_MIN..=JURY_SCORE_MAX).contains(s))
                .ok_or_else(|| {
                    SynthesisError::OracleOutputMalformed(format!(
                        "juror {} score {} is not an integer in [{}, {}]",
                        i,
                        juror.get("score").cloned().unwrap_or(Value::Null),
                        JURY_SCORE_MIN,
                        JURY_SCORE_MAX
                    ))
                })?;
            Ok(JurorScore {
                score: score as u32,
                verdict: juror
                    .get("verdict")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            })
        })
        .collect()
}

pub struct ConsensusEngine<'a> {
    oracle: &'a dyn ScoringOracle,
    models: ModelRoster,
    jurors: usize,
    pool: ThreadPool,
}

impl<'a> ConsensusEngine<'a> {
    pub fn new(
        oracle: &'a dyn ScoringOracle,
        models: ModelRoster,
        jurors: usize,
    ) -> Result<Self, SynthesisError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(CRITIC_PANEL.len())
            .thread_name(|i| format!("critic-{}", i))
            .build()
            .map_err(|e| SynthesisError::ConfigError(format!("critic pool: {}", e)))?;
        Ok(Self {
            oracle,
            models,
            jurors: jurors.max(1),
            pool,
        })
    }

    pub fn models(&self) -> &ModelRoster {
        &self.models
    }

    /// Critics, then jury, then the local score. `candidate` is the output under audit;
    /// `None` audits the specification alone.
    pub fn score(
        &self,
        specification: &str,
        candidate: Option<&str>,
    ) -> Result<ConsensusReport, SynthesisError> {
        let findings = self.run_panel(specification, candidate)?;
        let jury = self.convene_jury(&findings)?;
        let mean = mean_severity(&jury);
        let score = final_score(mean);
        info!(jurors = jury.len(), mean_severity = mean, final_score = score, "consensus reached");
        Ok(ConsensusReport {
            findings,
            jury,
            mean_severity: mean,
            final_score: score,
        })
    }

    /// Brain, audit, reconciler. The reconciler must produce a JSON object carrying the
    /// document's declared output fields.
    pub fn execute(
        &self,
        document: &SpecificationDocument,
        input: &Value,
    ) -> Result<ExecutionReport, SynthesisError> {
        let specification = document.oracle_context();
        let candidate = self.oracle.complete(&ChatRequest::new(
            &self.models.brain,
            vec![
                ChatMessage::system(
                    "Execute the logic described by the specification. Reasoning first, then a deterministic outcome.",
                ),
                ChatMessage::user(format!(
                    "Specification:\n{}\n\nInput:\n{}",
                    specification, input
                )),
            ],
        ))?;
        debug!(chars = candidate.len(), "brain output received");

        let consensus = self.score(&specification, Some(&candidate))?;
        let reconciled = self.reconcile(document, &candidate, &consensus)?;
        Ok(ExecutionReport {
            candidate,
            consensus,
            reconciled,
        })
    }

    fn run_panel(
        &self,
        specification: &str,
        candidate: Option<&str>,
    ) -> Result<Vec<CriticFinding>, SynthesisError> {
        let user_content = match candidate {
            Some(output) => format!(
                "Specification:\n{}\n\nOutput under audit:\n{}",
                specification, output
            ),
            None => format!("Specification:\n{}", specification),
        };
        // Every critic runs to completion before any failure is reported.
        let results: Vec<Result<CriticFinding, SynthesisError>> = self.pool.install(|| {
            CRITIC_PANEL
                .par_iter()
                .map(|role| {
                    let request = ChatRequest::new(
                        &self.models.critic,
                        vec![
                            ChatMessage::system(role.system_prompt),
                            ChatMessage::user(user_content.clone()),
                        ],
                    );
                    self.oracle.complete(&request).map(|text| CriticFinding {
                        critic: role.label.to_string(),
                        text,
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }

    fn convene_jury(&self, findings: &[CriticFinding]) -> Result<Vec<JurorScore>, SynthesisError> {
        let reports = findings
            .iter()
            .map(|f| format!("[{}]\n{}", f.critic, f.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let text = self.oracle.complete(&ChatRequest::new(
            &self.models.jury,
            vec![
                ChatMessage::system(format!(
                    "{}-person jury. Each juror gives a one-sentence verdict and a severity score from {} to {}. Output JSON only: {{\"jury\": [{{\"verdict\": string, \"score\": int}}]}}",
                    self.jurors, JURY_SCORE_MIN, JURY_SCORE_MAX
                )),
                ChatMessage::user(format!("Reports:\n{}", reports)),
            ],
        ))?;
        parse_jury(&text)
    }

    fn reconcile(
        &self,
        document: &SpecificationDocument,
        candidate: &str,
        consensus: &ConsensusReport,
    ) -> Result<Map<String, Value>, SynthesisError> {
        let mut fields = vec!["verdict: string".to_string(), "confidence: float".to_string()];
        for output in &document.custom_outputs {
            let ty = if output.field_type.is_empty() {
                "any"
            } else {
                output.field_type.as_str()
            };
            fields.push(format!("{}: {}", output.field_name, ty));
        }
        let audit = json!({
            "findings": consensus.findings,
            "finalScore": consensus.final_score,
        });
        let text = self.oracle.complete(&ChatRequest::new(
            &self.models.reconciler,
            vec![
                ChatMessage::system(format!(
                    "Assemble a final JSON object. Fields: {{{}}}. Output JSON only.",
                    fields.join(", ")
                )),
                ChatMessage::user(
                    json!({"brainOutput": candidate, "auditVerdict": audit}).to_string(),
                ),
            ],
        ))?;
        let object = first_json_object(&text).ok_or_else(|| {
            SynthesisError::OracleOutputMalformed("reconciler output contains no JSON object".into())
        })?;
        let missing: Vec<&str> = document
            .field_names()
            .into_iter()
            .filter(|name| !object.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(SynthesisError::OracleOutputMalformed(format!(
                "reconciler output is missing declared fields: {}",
                missing.join(", ")
            )));
        }
        Ok(object)
    }
}
