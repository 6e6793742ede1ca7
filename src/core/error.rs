use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Missing credential: {0}")]
    MissingCredential(String),
    #[error("Transient network error: {0}")]
    TransientNetworkError(String),
    #[error("HTTP error: {0}")]
    HttpError(String),
    #[error("Already done: {0}")]
    AlreadyDone(String),
    #[error("Atomic '{0}' is obsolete; execution refused")]
    ObsoleteAtomic(String),
    #[error("Atomic '{0}' is not registered on the ledger")]
    NotRegistered(String),
    #[error("Oracle output malformed: {0}")]
    OracleOutputMalformed(String),
    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaValidationFailure(Vec<String>),
    #[error("Nonce desync: {0}")]
    NonceDesync(String),
    #[error("Broadcast without confirmation: {0}")]
    UnconfirmedBroadcast(String),
    #[error("Ledger rejected transaction: {0}")]
    LedgerRejected(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        let transient_status = err
            .status()
            .map(|s| s.is_server_error() || s.as_u16() == 429)
            .unwrap_or(false);
        if err.is_timeout() || err.is_connect() || transient_status {
            SynthesisError::TransientNetworkError(err.to_string())
        } else {
            SynthesisError::HttpError(err.to_string())
        }
    }
}

impl From<toml::de::Error> for SynthesisError {
    fn from(err: toml::de::Error) -> Self {
        SynthesisError::ConfigError(err.to_string())
    }
}

/// How a failed ledger submission must be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network unreachable or timed out: resync, cool down, retry within the attempt bound.
    Transient,
    /// The effect is already on the ledger: success, sequence number not consumed.
    AlreadyDone,
    /// The ledger expected a different sequence number: resync, retry once.
    NonceDesync,
    /// Broadcast but never confirmed: the sequence number may be spent. Resync, never resend.
    Unconfirmed,
    /// Anything else: resync and abandon the id.
    Fatal,
}

pub fn classify_failure(err: &SynthesisError) -> FailureClass {
    match err {
        SynthesisError::TransientNetworkError(_) => FailureClass::Transient,
        SynthesisError::AlreadyDone(_) => FailureClass::AlreadyDone,
        SynthesisError::NonceDesync(_) => FailureClass::NonceDesync,
        SynthesisError::UnconfirmedBroadcast(_) => FailureClass::Unconfirmed,
        _ => FailureClass::Fatal,
    }
}
