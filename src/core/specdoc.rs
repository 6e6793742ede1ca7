//! Specification documents as published to the content store, and the genesis manifest
//! that lists them.

use crate::core::error::SynthesisError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomOutput {
    #[serde(alias = "field_name")]
    pub field_name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationDocument {
    /// Doubles as the atomic id in genesis manifests.
    pub outcome: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, alias = "success_bps")]
    pub success_bps: u32,
    #[serde(default, alias = "custom_outputs")]
    pub custom_outputs: Vec<CustomOutput>,
}

impl SpecificationDocument {
    /// Parse a content-store blob. JSON documents are taken as-is; anything else is treated
    /// as a bare markdown body for `atomic_id`.
    pub fn from_bytes(atomic_id: &str, bytes: &[u8]) -> Result<Self, SynthesisError> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            SynthesisError::ValidationError(format!(
                "specification for '{}' is not UTF-8: {}",
                atomic_id, e
            ))
        })?;
        let trimmed = text.trim_start();
        if trimmed.starts_with('{')
            && let Ok(doc) = serde_json::from_str::<SpecificationDocument>(trimmed)
        {
            return Ok(doc);
        }
        Ok(Self {
            outcome: atomic_id.to_string(),
            details: text.to_string(),
            success_bps: 0,
            custom_outputs: Vec::new(),
        })
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.custom_outputs
            .iter()
            .map(|o| o.field_name.as_str())
            .collect()
    }

    /// Text handed to the oracle: the full document as pretty JSON.
    pub fn oracle_context(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.details.clone())
    }
}

/// Ordered list of specification documents; `outcome` is the atomic id.
pub fn load_manifest(path: &Path) -> Result<Vec<SpecificationDocument>, SynthesisError> {
    if !path.exists() {
        return Err(SynthesisError::NotFound(format!(
            "genesis manifest not found at {}",
            path.display()
        )));
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        SynthesisError::ValidationError(format!(
            "invalid genesis manifest {}: {}",
            path.display(),
            e
        ))
    })
}
