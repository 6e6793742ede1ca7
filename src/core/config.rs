//! `.synthesis/config.toml`.
//!
//! Every key has a default, so a missing file (or an empty one) yields a fully local setup:
//! SQLite ledger, on-disk content store, execute mode with advisory schema checks.
//! Secrets never live here; they come from the environment.

use crate::core::consensus::{DEFAULT_JURORS, ModelRoster};
use crate::core::error::SynthesisError;
use crate::core::retry::{DEFAULT_COOLDOWN, MAX_ATTEMPTS, RetryPolicy};
use crate::core::silo::DEFAULT_STRIKE_THRESHOLD;
use crate::core::store;
use crate::plugins::oracle::DEFAULT_ENDPOINT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    #[default]
    Local,
    Rpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Local,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Log and continue.
    #[default]
    Advisory,
    /// Abort with `SchemaValidationFailure`.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    #[default]
    Execute,
    Sweep,
}

impl AuditMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditMode::Execute => "execute",
            AuditMode::Sweep => "sweep",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub kind: LedgerKind,
    pub rpc_url: String,
    /// The single controlling account.
    pub account: String,
    /// Defaults to `account` when empty.
    pub creator: String,
    pub min_allowance: u64,
    pub approve_amount: u64,
    pub strike_threshold: u32,
    /// Balance granted to `account` the first time a local ledger is created.
    pub initial_balance: u64,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            kind: LedgerKind::Local,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            account: "0x00000000000000000000000000000000005e1f01".to_string(),
            creator: String::new(),
            min_allowance: 10,
            approve_amount: 1_000,
            strike_threshold: DEFAULT_STRIKE_THRESHOLD,
            initial_balance: 10_000,
            timeout_secs: 30,
        }
    }
}

impl LedgerConfig {
    pub fn creator(&self) -> &str {
        if self.creator.trim().is_empty() {
            &self.account
        } else {
            &self.creator
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub kind: ContentKind,
    pub scheme: String,
    pub gateway_url: String,
    pub upload_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            kind: ContentKind::Local,
            scheme: "ar".to_string(),
            gateway_url: "https://arweave.net".to_string(),
            upload_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: String,
    pub models: ModelRoster,
    pub jurors: usize,
    pub stream: bool,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            models: ModelRoster::default(),
            jurors: DEFAULT_JURORS,
            stream: true,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: AuditMode,
    pub schema_policy: SchemaPolicy,
    pub max_attempts: u32,
    pub cooldown_ms: u64,
    /// Genesis manifest, relative to the project root.
    pub manifest: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: AuditMode::Execute,
            schema_policy: SchemaPolicy::Advisory,
            max_attempts: MAX_ATTEMPTS,
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            manifest: PathBuf::from("genesis_manifest.json"),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SynthesisConfig {
    pub ledger: LedgerConfig,
    pub content: ContentConfig,
    pub oracle: OracleConfig,
    pub pipeline: PipelineConfig,
}

impl SynthesisConfig {
    pub fn parse(raw: &str) -> Result<Self, SynthesisError> {
        let config: SynthesisConfig = toml::from_str(raw)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SynthesisError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            SynthesisError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Explicit path wins; otherwise `<project>/.synthesis/config.toml` if it exists;
    /// otherwise defaults.
    pub fn resolve(explicit: Option<&Path>, project_root: &Path) -> Result<Self, SynthesisError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = store::default_config_path(project_root);
        if default_path.is_file() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    fn check(&self) -> Result<(), SynthesisError> {
        if self.ledger.account.trim().is_empty() {
            return Err(SynthesisError::ConfigError("ledger.account is empty".into()));
        }
        if self.ledger.kind == LedgerKind::Rpc && self.ledger.rpc_url.trim().is_empty() {
            return Err(SynthesisError::ConfigError(
                "ledger.rpc_url is required for kind = \"rpc\"".into(),
            ));
        }
        if self.ledger.approve_amount < self.ledger.min_allowance {
            return Err(SynthesisError::ConfigError(format!(
                "ledger.approve_amount ({}) is below ledger.min_allowance ({})",
                self.ledger.approve_amount, self.ledger.min_allowance
            )));
        }
        if self.ledger.strike_threshold == 0 {
            return Err(SynthesisError::ConfigError(
                "ledger.strike_threshold must be at least 1".into(),
            ));
        }
        if self.oracle.jurors == 0 {
            return Err(SynthesisError::ConfigError("oracle.jurors must be at least 1".into()));
        }
        Ok(())
    }

    pub fn manifest_path(&self, project_root: &Path) -> PathBuf {
        if self.pipeline.manifest.is_absolute() {
            self.pipeline.manifest.clone()
        } else {
            project_root.join(&self.pipeline.manifest)
        }
    }
}
