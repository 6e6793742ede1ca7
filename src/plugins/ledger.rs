//! The ledger seam: registry reads, fee allowance, and the four mutating calls.
//!
//! Every mutating call takes an explicit sequence number issued by
//! [`NonceSequencer`](crate::core::nonce::NonceSequencer) and returns only after the ledger
//! confirmed inclusion. Failures surface through the shared error taxonomy:
//! `AlreadyDone` (idempotent success), `NonceDesync`, `TransientNetworkError`, or
//! `LedgerRejected`.

use crate::core::error::SynthesisError;
use crate::core::nonce::NonceSource;
use crate::core::silo::AtomicRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Units charged per mutating call.
pub const TX_FEE: u64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOp {
    Approve,
    Register,
    AnchorScore,
    IssueStrike,
}

impl LedgerOp {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerOp::Approve => "approve",
            LedgerOp::Register => "register",
            LedgerOp::AnchorScore => "anchor_score",
            LedgerOp::IssueStrike => "issue_strike",
        }
    }
}

impl fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confirmation of an included transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub nonce: u64,
    pub op: LedgerOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomic_id: Option<String>,
}

pub trait Ledger: NonceSource {
    /// Registry read. Unregistered ids come back as [`AtomicRecord::unregistered`].
    fn lookup(&self, id: &str) -> Result<AtomicRecord, SynthesisError>;

    fn allowance(&self, account: &str) -> Result<u64, SynthesisError>;

    fn balance(&self, account: &str) -> Result<u64, SynthesisError>;

    /// Authorize the ledger to draw `amount` fee units from `account`.
    fn approve(&self, account: &str, amount: u64, nonce: u64)
    -> Result<TxReceipt, SynthesisError>;

    fn register(
        &self,
        account: &str,
        id: &str,
        spec_pointer: &str,
        creator: &str,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError>;

    /// Append an integrity pulse. The registry record itself is not modified.
    fn anchor_score(
        &self,
        account: &str,
        id: &str,
        score: u32,
        certification_hash: &str,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError>;

    /// Record a new score for `id`; the ledger decides whether it counts as a strike.
    fn issue_strike(
        &self,
        account: &str,
        id: &str,
        score: u32,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError>;

    /// Ids the ledger can enumerate. Remote registries generally cannot.
    fn known_ids(&self) -> Result<Vec<String>, SynthesisError> {
        Ok(Vec::new())
    }

    /// Short label for status output.
    fn describe(&self) -> String;
}

/// Registry read shapes a remote ledger may expose, tried in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadCapability {
    /// `registry(id)` returning a named-field object.
    RegistryByName,
    /// `registry(id)` returning a positional tuple.
    RegistryTuple,
    /// `registryByHash(sha256(id))` returning a named-field object.
    RegistryByHash,
}

pub const READ_PROBE_ORDER: [ReadCapability; 3] = [
    ReadCapability::RegistryByName,
    ReadCapability::RegistryTuple,
    ReadCapability::RegistryByHash,
];

impl ReadCapability {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadCapability::RegistryByName => "registry_by_name",
            ReadCapability::RegistryTuple => "registry_tuple",
            ReadCapability::RegistryByHash => "registry_by_hash",
        }
    }
}

/// Try each capability in `order` and keep the first that answers. Transient failures end
/// negotiation immediately instead of being mistaken for a missing capability.
pub fn negotiate<T, F>(
    order: &[ReadCapability],
    mut probe: F,
) -> Result<(ReadCapability, T), SynthesisError>
where
    F: FnMut(ReadCapability) -> Result<T, SynthesisError>,
{
    let mut refused = Vec::new();
    for &capability in order {
        match probe(capability) {
            Ok(value) => {
                debug!(capability = capability.as_str(), "read capability negotiated");
                return Ok((capability, value));
            }
            Err(SynthesisError::TransientNetworkError(msg)) => {
                return Err(SynthesisError::TransientNetworkError(msg));
            }
            Err(e) => refused.push(format!("{}: {}", capability.as_str(), e)),
        }
    }
    Err(SynthesisError::LedgerRejected(format!(
        "no registry read capability matched ({})",
        refused.join("; ")
    )))
}
