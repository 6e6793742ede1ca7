//! Remote ledger over JSON-RPC 2.0.
//!
//! Reads negotiate a registry shape once per process (see [`negotiate`]); writes go through
//! `synthesis_sendTransaction` and block until a receipt is observed. Errors raised before
//! broadcast are classified by message; a reverted receipt is always `LedgerRejected`
//! because its sequence number is already spent.

use crate::core::certify::decode_hash;
use crate::core::error::SynthesisError;
use crate::core::nonce::NonceSource;
use crate::core::silo::AtomicRecord;
use crate::plugins::ledger::{
    Ledger, LedgerOp, READ_PROBE_ORDER, ReadCapability, TxReceipt, negotiate,
};
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub const LEDGER_TOKEN_ENV: &str = "SYNTHESIS_LEDGER_TOKEN";

const ALREADY_DONE_MARKERS: [&str; 3] = ["already registered", "already exists", "already anchored"];
const NONCE_MARKERS: [&str; 4] = [
    "nonce too low",
    "nonce too high",
    "invalid nonce",
    "replacement transaction underpriced",
];
const TRANSIENT_MARKERS: [&str; 3] = ["rate limit", "timeout", "temporarily unavailable"];
/// JSON-RPC "limit exceeded".
const RPC_LIMIT_EXCEEDED: i64 = -32005;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Map a JSON-RPC error onto the shared failure taxonomy.
pub fn classify_rpc_error(err: &RpcErrorObject) -> SynthesisError {
    let lower = err.message.to_lowercase();
    if ALREADY_DONE_MARKERS.iter().any(|m| lower.contains(m)) {
        SynthesisError::AlreadyDone(err.message.clone())
    } else if NONCE_MARKERS.iter().any(|m| lower.contains(m)) {
        SynthesisError::NonceDesync(err.message.clone())
    } else if err.code == RPC_LIMIT_EXCEEDED || TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        SynthesisError::TransientNetworkError(err.message.clone())
    } else {
        SynthesisError::LedgerRejected(format!("{} (code {})", err.message, err.code))
    }
}

/// Quantities arrive as JSON numbers, decimal strings, or `0x` hex strings.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) if hex.is_empty() => Some(0),
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        Value::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

fn parse_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => parse_quantity(other).is_some_and(|n| n != 0),
    }
}

fn malformed(id: &str, shape: &str) -> SynthesisError {
    SynthesisError::LedgerRejected(format!("registry answer for '{}' is not a {}", id, shape))
}

/// `{cid, creator, bps, strikes, isObsolete}` with tolerated aliases.
pub fn parse_record_object(id: &str, value: &Value) -> Result<AtomicRecord, SynthesisError> {
    if value.is_null() {
        return Ok(AtomicRecord::unregistered(id));
    }
    let obj = value.as_object().ok_or_else(|| malformed(id, "record object"))?;
    let pick = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));
    let text = |keys: &[&str]| {
        pick(keys)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let score = pick(&["bps", "score"])
        .and_then(parse_quantity)
        .ok_or_else(|| malformed(id, "record object with a score"))?;
    Ok(AtomicRecord {
        id: id.to_string(),
        spec_pointer: text(&["cid", "specPointer"]),
        creator: text(&["creator"]),
        score: u32::try_from(score).map_err(|_| malformed(id, "bps-bounded score"))?,
        strike_count: match pick(&["strikes", "strikeCount"]).and_then(parse_quantity) {
            Some(n) => u32::try_from(n).map_err(|_| malformed(id, "u32 strike count"))?,
            None => 0,
        },
        obsolete: pick(&["isObsolete", "obsolete"]).is_some_and(parse_flag),
    })
}

/// Positional `[cid, creator, bps, strikes, isObsolete]`.
pub fn parse_record_tuple(id: &str, value: &Value) -> Result<AtomicRecord, SynthesisError> {
    if value.is_null() {
        return Ok(AtomicRecord::unregistered(id));
    }
    let items = value
        .as_array()
        .filter(|a| a.len() >= 5)
        .ok_or_else(|| malformed(id, "five-element tuple"))?;
    let score = parse_quantity(&items[2]).ok_or_else(|| malformed(id, "tuple with a score"))?;
    Ok(AtomicRecord {
        id: id.to_string(),
        spec_pointer: items[0].as_str().unwrap_or_default().to_string(),
        creator: items[1].as_str().unwrap_or_default().to_string(),
        score: u32::try_from(score).map_err(|_| malformed(id, "bps-bounded score"))?,
        strike_count: match parse_quantity(&items[3]) {
            Some(n) => u32::try_from(n).map_err(|_| malformed(id, "u32 strike count"))?,
            None => 0,
        },
        obsolete: parse_flag(&items[4]),
    })
}

pub fn hashed_id(id: &str) -> String {
    format!("0x{}", hex::encode(Sha256::digest(id.as_bytes())))
}

pub struct RpcLedger {
    client: HttpClient,
    endpoint: String,
    token: String,
    capability: Mutex<Option<ReadCapability>>,
    next_request_id: AtomicU64,
    receipt_poll: Duration,
    receipt_attempts: u32,
}

impl RpcLedger {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self, SynthesisError> {
        if token.trim().is_empty() {
            return Err(SynthesisError::MissingCredential(LEDGER_TOKEN_ENV.to_string()));
        }
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            capability: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            receipt_poll: Duration::from_secs(1),
            receipt_attempts: 60,
        })
    }

    /// Read the bearer token from [`LEDGER_TOKEN_ENV`].
    pub fn from_env(endpoint: &str, timeout: Duration) -> Result<Self, SynthesisError> {
        let token = std::env::var(LEDGER_TOKEN_ENV)
            .map_err(|_| SynthesisError::MissingCredential(LEDGER_TOKEN_ENV.to_string()))?;
        Self::new(endpoint, &token, timeout)
    }

    pub fn with_receipt_polling(mut self, poll: Duration, attempts: u32) -> Self {
        self.receipt_poll = poll;
        self.receipt_attempts = attempts.max(1);
        self
    }

    pub fn negotiated_capability(&self) -> Option<ReadCapability> {
        self.capability.lock().ok().and_then(|c| *c)
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, SynthesisError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let response: RpcResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        if let Some(err) = response.error {
            debug!(method, code = err.code, message = %err.message, "ledger call refused");
            return Err(classify_rpc_error(&err));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn read_with(&self, capability: ReadCapability, id: &str) -> Result<AtomicRecord, SynthesisError> {
        match capability {
            ReadCapability::RegistryByName => {
                parse_record_object(id, &self.call("synthesis_registry", json!([id]))?)
            }
            ReadCapability::RegistryTuple => {
                parse_record_tuple(id, &self.call("synthesis_registryTuple", json!([id]))?)
            }
            ReadCapability::RegistryByHash => parse_record_object(
                id,
                &self.call("synthesis_registryByHash", json!([hashed_id(id)]))?,
            ),
        }
    }

    fn send_transaction(
        &self,
        account: &str,
        nonce: u64,
        op: LedgerOp,
        atomic_id: Option<&str>,
        args: Value,
    ) -> Result<TxReceipt, SynthesisError> {
        let submitted = self.call(
            "synthesis_sendTransaction",
            json!([{
                "from": account,
                "nonce": format!("0x{:x}", nonce),
                "op": op.as_str(),
                "args": args,
            }]),
        )?;
        let tx_hash = submitted
            .as_str()
            .or_else(|| submitted.get("txHash").and_then(|v| v.as_str()))
            .ok_or_else(|| {
                SynthesisError::LedgerRejected("sendTransaction returned no hash".into())
            })?
            .to_string();
        self.wait_for_receipt(&tx_hash)?;
        Ok(TxReceipt {
            tx_hash,
            nonce,
            op,
            atomic_id: atomic_id.map(|s| s.to_string()),
        })
    }

    /// Poll for the receipt of an already broadcast transaction. Once broadcast, nothing
    /// short of a receipt settles the outcome: read failures keep polling, and an exhausted
    /// window is `UnconfirmedBroadcast`, never a plain transient error.
    fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), SynthesisError> {
        for attempt in 1..=self.receipt_attempts {
            match self.call("synthesis_getTransactionReceipt", json!([tx_hash])) {
                Ok(receipt) if !receipt.is_null() => {
                    if receipt.get("status").is_some_and(parse_flag) {
                        return Ok(());
                    }
                    let reason = receipt
                        .get("revertReason")
                        .and_then(|v| v.as_str())
                        .unwrap_or("reverted");
                    return Err(SynthesisError::LedgerRejected(format!(
                        "{} reverted: {}",
                        tx_hash, reason
                    )));
                }
                Ok(_) => debug!(tx_hash, attempt, "receipt pending"),
                Err(e) => debug!(tx_hash, attempt, error = %e, "receipt read failed"),
            }
            if attempt < self.receipt_attempts {
                thread::sleep(self.receipt_poll);
            }
        }
        warn!(tx_hash, "receipt not observed within polling window");
        Err(SynthesisError::UnconfirmedBroadcast(format!(
            "no receipt for {} after {} polls",
            tx_hash, self.receipt_attempts
        )))
    }
}

impl NonceSource for RpcLedger {
    fn pending_count(&self, account: &str) -> Result<u64, SynthesisError> {
        let value = self.call("eth_getTransactionCount", json!([account, "pending"]))?;
        parse_quantity(&value).ok_or_else(|| {
            SynthesisError::LedgerRejected(format!("unreadable pending count: {}", value))
        })
    }
}

impl Ledger for RpcLedger {
    fn lookup(&self, id: &str) -> Result<AtomicRecord, SynthesisError> {
        if let Some(capability) = self.negotiated_capability() {
            return self.read_with(capability, id);
        }
        let (capability, record) = negotiate(&READ_PROBE_ORDER, |cap| self.read_with(cap, id))?;
        if let Ok(mut slot) = self.capability.lock() {
            *slot = Some(capability);
        }
        Ok(record)
    }

    fn allowance(&self, account: &str) -> Result<u64, SynthesisError> {
        let value = self.call("synthesis_allowance", json!([account]))?;
        parse_quantity(&value)
            .ok_or_else(|| SynthesisError::LedgerRejected(format!("unreadable allowance: {}", value)))
    }

    fn balance(&self, account: &str) -> Result<u64, SynthesisError> {
        let value = self.call("synthesis_balanceOf", json!([account]))?;
        parse_quantity(&value)
            .ok_or_else(|| SynthesisError::LedgerRejected(format!("unreadable balance: {}", value)))
    }

    fn approve(
        &self,
        account: &str,
        amount: u64,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        self.send_transaction(account, nonce, LedgerOp::Approve, None, json!({"amount": amount}))
    }

    fn register(
        &self,
        account: &str,
        id: &str,
        spec_pointer: &str,
        creator: &str,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        self.send_transaction(
            account,
            nonce,
            LedgerOp::Register,
            Some(id),
            json!({"id": id, "cid": spec_pointer, "creator": creator}),
        )
    }

    fn anchor_score(
        &self,
        account: &str,
        id: &str,
        score: u32,
        certification_hash: &str,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        let digest = decode_hash(certification_hash).ok_or_else(|| {
            SynthesisError::ValidationError(format!(
                "certification hash for '{}' is not a 32-byte hex digest",
                id
            ))
        })?;
        self.send_transaction(
            account,
            nonce,
            LedgerOp::AnchorScore,
            Some(id),
            json!({"id": id, "bps": score, "certificationHash": format!("0x{}", hex::encode(digest))}),
        )
    }

    fn issue_strike(
        &self,
        account: &str,
        id: &str,
        score: u32,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        self.send_transaction(
            account,
            nonce,
            LedgerOp::IssueStrike,
            Some(id),
            json!({"id": id, "bps": score}),
        )
    }

    fn describe(&self) -> String {
        format!("rpc:{}", self.endpoint)
    }
}
