//! Optional input-schema enforcement for specification documents.
//!
//! A specification may embed a JSON Schema in a fenced block under a "JSON Schema for
//! Input Validation" heading. No block means SOVEREIGN mode (everything passes). A block
//! that does not parse or compile is logged and also yields SOVEREIGN mode.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

static SCHEMA_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)#+\s*(?:\d+\.\s*)?JSON Schema for Input Validation[^\n]*\n.*?```json[ \t]*\r?\n(.*?)\r?\n```",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationMode {
    /// No usable schema; any payload passes.
    Sovereign,
    Validated,
    Failed,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationMode::Sovereign => "SOVEREIGN",
            ValidationMode::Validated => "VALIDATED",
            ValidationMode::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub mode: ValidationMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn sovereign() -> Self {
        Self {
            ok: true,
            mode: ValidationMode::Sovereign,
            errors: Vec::new(),
        }
    }
}

/// A compiled input schema together with its source JSON.
pub struct InputSchema {
    raw: Value,
    validator: jsonschema::Validator,
}

impl InputSchema {
    pub fn compile(raw: Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(&raw).map_err(|e| e.to_string())?;
        Ok(Self { raw, validator })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSchema").field("raw", &self.raw).finish()
    }
}

/// Locate and compile the schema block in a specification body.
pub fn extract(specification_text: &str) -> Option<InputSchema> {
    let block = SCHEMA_BLOCK.captures(specification_text)?.get(1)?.as_str();
    let raw: Value = match serde_json::from_str(block) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "input schema block is malformed JSON; proceeding without strict validation");
            return None;
        }
    };
    match InputSchema::compile(raw) {
        Ok(schema) => Some(schema),
        Err(e) => {
            warn!(error = %e, "input schema does not compile; proceeding without strict validation");
            None
        }
    }
}

pub fn validate(schema: Option<&InputSchema>, payload: &Value) -> ValidationReport {
    let Some(schema) = schema else {
        return ValidationReport::sovereign();
    };
    let errors: Vec<String> = schema
        .validator
        .iter_errors(payload)
        .map(|e| format!("{} {}", e.instance_path, e).trim().to_string())
        .collect();
    if errors.is_empty() {
        ValidationReport {
            ok: true,
            mode: ValidationMode::Validated,
            errors,
        }
    } else {
        ValidationReport {
            ok: false,
            mode: ValidationMode::Failed,
            errors,
        }
    }
}
