//! Append-only audit trail (`audit.events.jsonl`).
//!
//! Every stage transition, ledger submission and oracle exchange is written as one JSON
//! line. Payloads pass through [`redact`] first: prompts and gateway responses routinely
//! echo credentials back.

use crate::core::error::SynthesisError;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const AUDIT_LOG_NAME: &str = "audit.events.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub ts: String,
    pub actor: String,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomic_id: Option<String>,
    pub status: String,
    pub detail: Value,
}

impl AuditEvent {
    pub fn new(op: &str, atomic_id: Option<&str>, status: &str, detail: Value) -> Self {
        Self {
            event_id: time::new_event_id(),
            ts: time::now_iso8601(),
            actor: "synthesis".to_string(),
            op: op.to_string(),
            atomic_id: atomic_id.map(|s| s.to_string()),
            status: status.to_string(),
            detail,
        }
    }
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // xAI / OpenAI style API keys
        (
            Regex::new(r"\b(xai|sk)-[A-Za-z0-9_\-]{20,}").unwrap(),
            "[API_KEY_REDACTED]",
        ),
        (
            Regex::new(r"(?i)bearer\s+[a-zA-Z0-9_\-\.]{20,}").unwrap(),
            "[BEARER_REDACTED]",
        ),
        (
            Regex::new(r"-----BEGIN (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----[\s\S]*?-----END (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(),
            "[PEM_KEY_REDACTED]",
        ),
        (
            Regex::new(
                r#"(?i)(api[_-]?key|apikey|api_secret|secret[_-]?key|private[_-]?key)['"]?\s*[:=]\s*['"]?[a-zA-Z0-9_\-]{20,}['"]?"#,
            )
            .unwrap(),
            "[API_KEY_REDACTED]",
        ),
    ]
});

/// Redact secrets from a plain string value.
pub fn redact_string(input: &str) -> String {
    let mut result = input.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Recursively redact a JSON value.
///
/// Keys that look sensitive (token, secret, password, api_key, authorization,
/// private_key) are replaced wholesale; string values are pattern-scanned.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted_map = Map::new();
            for (key, val) in map {
                let lower_key = key.to_lowercase();
                if lower_key.contains("token")
                    || lower_key.contains("secret")
                    || lower_key.contains("password")
                    || lower_key.contains("api_key")
                    || lower_key.contains("authorization")
                    || lower_key.contains("private_key")
                {
                    redacted_map.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted_map.insert(key, redact(val));
                }
            }
            Value::Object(redacted_map)
        }
        Value::Array(vec) => Value::Array(vec.into_iter().map(redact).collect()),
        Value::String(s) => Value::String(redact_string(&s)),
        other => other,
    }
}

pub fn audit_log_path(store_root: &Path) -> PathBuf {
    store_root.join(AUDIT_LOG_NAME)
}

pub fn append_event(store_root: &Path, event: AuditEvent) -> Result<(), SynthesisError> {
    std::fs::create_dir_all(store_root)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(audit_log_path(store_root))?;

    let redacted = AuditEvent {
        detail: redact(event.detail),
        ..event
    };
    let json = serde_json::to_string(&redacted)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

pub fn last_events(store_root: &Path, n: usize) -> Result<Vec<AuditEvent>, SynthesisError> {
    let path = audit_log_path(store_root);
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..]
        .iter()
        .map(|l| serde_json::from_str(l).map_err(SynthesisError::from))
        .collect()
}
