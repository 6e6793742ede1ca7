//! Local ledger backed by SQLite.
//!
//! Mirrors the remote registry's rules closely enough to run the whole pipeline offline:
//! per-account sequence numbers must match exactly, every mutating call except `approve`
//! draws [`TX_FEE`] from both the allowance and the balance, and a record that reaches the
//! strike threshold becomes obsolete and refuses further mutation.

use crate::core::db;
use crate::core::error::SynthesisError;
use crate::core::nonce::NonceSource;
use crate::core::schemas;
use crate::core::silo::{AtomicRecord, DEFAULT_STRIKE_THRESHOLD, DEGRADED_BELOW_BPS, MAX_BPS};
use crate::core::time;
use crate::plugins::ledger::{Ledger, LedgerOp, TX_FEE, TxReceipt};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// One appended integrity pulse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pulse {
    pub tx_hash: String,
    pub atomic_id: String,
    pub score: u32,
    pub certification_hash: String,
    pub ts: String,
}

pub struct SqliteLedger {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    strike_threshold: u32,
}

impl SqliteLedger {
    pub fn open(path: &Path, strike_threshold: u32) -> Result<Self, SynthesisError> {
        let conn = db::db_connect(path)?;
        Self::init(conn, Some(path.to_path_buf()), strike_threshold)
    }

    pub fn in_memory() -> Result<Self, SynthesisError> {
        let conn = db::db_connect_in_memory()?;
        Self::init(conn, None, DEFAULT_STRIKE_THRESHOLD)
    }

    fn init(
        conn: Connection,
        path: Option<PathBuf>,
        strike_threshold: u32,
    ) -> Result<Self, SynthesisError> {
        for stmt in schemas::ledger_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            strike_threshold: strike_threshold.max(1),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SynthesisError> {
        self.conn
            .lock()
            .map_err(|_| SynthesisError::LedgerRejected("ledger connection poisoned".into()))
    }

    /// Add `amount` to the balance of `account`, creating it when missing.
    pub fn credit(&self, account: &str, amount: u64) -> Result<u64, SynthesisError> {
        let conn = self.lock()?;
        ensure_account(&conn, account)?;
        conn.execute(
            "UPDATE accounts SET balance = balance + ?1 WHERE address = ?2",
            params![amount, account],
        )?;
        let balance: u64 = conn.query_row(
            "SELECT balance FROM accounts WHERE address = ?1",
            params![account],
            |row| row.get(0),
        )?;
        info!(account, amount, balance, "account credited");
        Ok(balance)
    }

    /// Integrity pulses for `id`, oldest first.
    pub fn pulses(&self, id: &str) -> Result<Vec<Pulse>, SynthesisError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tx_hash, atomic_id, score, certification_hash, ts FROM pulses
             WHERE atomic_id = ?1 ORDER BY ts, rowid",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(Pulse {
                tx_hash: row.get(0)?,
                atomic_id: row.get(1)?,
                score: row.get(2)?,
                certification_hash: row.get(3)?,
                ts: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Confirmed sequence numbers for `account`, ascending.
    pub fn confirmed_nonces(&self, account: &str) -> Result<Vec<u64>, SynthesisError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT nonce FROM transactions WHERE account = ?1 ORDER BY nonce")?;
        let rows = stmt.query_map(params![account], |row| row.get::<_, u64>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Shared path for every mutating call. `precheck` runs before the sequence number is
    /// examined so idempotent repeats surface as `AlreadyDone` without consuming it.
    fn submit<P, A>(
        &self,
        account: &str,
        nonce: u64,
        op: LedgerOp,
        atomic_id: Option<&str>,
        precheck: P,
        apply: A,
    ) -> Result<TxReceipt, SynthesisError>
    where
        P: FnOnce(&Transaction<'_>) -> Result<(), SynthesisError>,
        A: FnOnce(&Transaction<'_>, &str) -> Result<(), SynthesisError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_account(&tx, account)?;
        precheck(&tx)?;

        let (expected, balance, allowance): (u64, u64, u64) = tx.query_row(
            "SELECT nonce, balance, allowance FROM accounts WHERE address = ?1",
            params![account],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        if nonce != expected {
            let relation = if nonce < expected { "low" } else { "high" };
            return Err(SynthesisError::NonceDesync(format!(
                "nonce too {}: submitted {}, ledger expects {}",
                relation, nonce, expected
            )));
        }
        if op != LedgerOp::Approve {
            if allowance < TX_FEE {
                return Err(SynthesisError::LedgerRejected(format!(
                    "insufficient allowance: {} < {}",
                    allowance, TX_FEE
                )));
            }
            if balance < TX_FEE {
                return Err(SynthesisError::LedgerRejected(format!(
                    "insufficient balance: {} < {}",
                    balance, TX_FEE
                )));
            }
            tx.execute(
                "UPDATE accounts SET balance = balance - ?1, allowance = allowance - ?1
                 WHERE address = ?2",
                params![TX_FEE, account],
            )?;
        }

        let tx_hash = transaction_hash(account, nonce, op, atomic_id);
        tx.execute(
            "INSERT INTO transactions(tx_hash, account, nonce, op, atomic_id, ts)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![tx_hash, account, nonce, op.as_str(), atomic_id, time::now_iso8601()],
        )?;
        apply(&tx, &tx_hash)?;
        tx.execute(
            "UPDATE accounts SET nonce = nonce + 1 WHERE address = ?1",
            params![account],
        )?;
        tx.commit()?;

        debug!(account, nonce, op = op.as_str(), tx_hash = %tx_hash, "transaction confirmed");
        Ok(TxReceipt {
            tx_hash,
            nonce,
            op,
            atomic_id: atomic_id.map(|s| s.to_string()),
        })
    }
}

fn ensure_account(conn: &Connection, account: &str) -> Result<(), SynthesisError> {
    conn.execute(
        "INSERT OR IGNORE INTO accounts(address, nonce, balance, allowance) VALUES(?1, 0, 0, 0)",
        params![account],
    )?;
    Ok(())
}

fn load_record(conn: &Connection, id: &str) -> Result<Option<AtomicRecord>, SynthesisError> {
    let record = conn
        .query_row(
            "SELECT id, spec_pointer, creator, score, strike_count, obsolete FROM atomics
             WHERE id = ?1",
            params![id],
            |row| {
                Ok(AtomicRecord {
                    id: row.get(0)?,
                    spec_pointer: row.get(1)?,
                    creator: row.get(2)?,
                    score: row.get(3)?,
                    strike_count: row.get(4)?,
                    obsolete: row.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn require_mutable(conn: &Connection, id: &str) -> Result<AtomicRecord, SynthesisError> {
    match load_record(conn, id)? {
        None => Err(SynthesisError::LedgerRejected(format!(
            "atomic '{}' is not registered",
            id
        ))),
        Some(record) if record.obsolete => Err(SynthesisError::LedgerRejected(format!(
            "atomic '{}' is obsolete",
            id
        ))),
        Some(record) => Ok(record),
    }
}

fn transaction_hash(account: &str, nonce: u64, op: LedgerOp, atomic_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(op.as_str().as_bytes());
    hasher.update(atomic_id.unwrap_or_default().as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

impl NonceSource for SqliteLedger {
    fn pending_count(&self, account: &str) -> Result<u64, SynthesisError> {
        let conn = self.lock()?;
        let nonce = conn
            .query_row(
                "SELECT nonce FROM accounts WHERE address = ?1",
                params![account],
                |row| row.get::<_, u64>(0),
            )
            .optional()?;
        Ok(nonce.unwrap_or(0))
    }
}

impl Ledger for SqliteLedger {
    fn lookup(&self, id: &str) -> Result<AtomicRecord, SynthesisError> {
        let conn = self.lock()?;
        Ok(load_record(&conn, id)?.unwrap_or_else(|| AtomicRecord::unregistered(id)))
    }

    fn allowance(&self, account: &str) -> Result<u64, SynthesisError> {
        let conn = self.lock()?;
        let v = conn
            .query_row(
                "SELECT allowance FROM accounts WHERE address = ?1",
                params![account],
                |row| row.get::<_, u64>(0),
            )
            .optional()?;
        Ok(v.unwrap_or(0))
    }

    fn balance(&self, account: &str) -> Result<u64, SynthesisError> {
        let conn = self.lock()?;
        let v = conn
            .query_row(
                "SELECT balance FROM accounts WHERE address = ?1",
                params![account],
                |row| row.get::<_, u64>(0),
            )
            .optional()?;
        Ok(v.unwrap_or(0))
    }

    fn approve(
        &self,
        account: &str,
        amount: u64,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        self.submit(
            account,
            nonce,
            LedgerOp::Approve,
            None,
            |_| Ok(()),
            |tx, _| {
                tx.execute(
                    "UPDATE accounts SET allowance = ?1 WHERE address = ?2",
                    params![amount, account],
                )?;
                Ok(())
            },
        )
    }

    fn register(
        &self,
        account: &str,
        id: &str,
        spec_pointer: &str,
        creator: &str,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        self.submit(
            account,
            nonce,
            LedgerOp::Register,
            Some(id),
            |tx| {
                if load_record(tx, id)?.is_some() {
                    return Err(SynthesisError::AlreadyDone(format!(
                        "atomic '{}' already registered",
                        id
                    )));
                }
                Ok(())
            },
            |tx, _| {
                tx.execute(
                    "INSERT INTO atomics(id, spec_pointer, creator, score, strike_count, obsolete, registered_at)
                     VALUES(?1, ?2, ?3, ?4, 0, 0, ?5)",
                    params![id, spec_pointer, creator, MAX_BPS, time::now_iso8601()],
                )?;
                Ok(())
            },
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
        if score > MAX_BPS {
            return Err(SynthesisError::LedgerRejected(format!(
                "score {} exceeds {}",
                score, MAX_BPS
            )));
        }
        self.submit(
            account,
            nonce,
            LedgerOp::AnchorScore,
            Some(id),
            |tx| {
                require_mutable(tx, id)?;
                let seen: Option<String> = tx
                    .query_row(
                        "SELECT tx_hash FROM pulses WHERE atomic_id = ?1 AND certification_hash = ?2",
                        params![id, certification_hash],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(prior) = seen {
                    return Err(SynthesisError::AlreadyDone(format!(
                        "certification already anchored in {}",
                        prior
                    )));
                }
                Ok(())
            },
            |tx, tx_hash| {
                tx.execute(
                    "INSERT INTO pulses(tx_hash, atomic_id, score, certification_hash, ts)
                     VALUES(?1, ?2, ?3, ?4, ?5)",
                    params![tx_hash, id, score, certification_hash, time::now_iso8601()],
                )?;
                Ok(())
            },
        )
    }

    fn issue_strike(
        &self,
        account: &str,
        id: &str,
        score: u32,
        nonce: u64,
    ) -> Result<TxReceipt, SynthesisError> {
        if score > MAX_BPS {
            return Err(SynthesisError::LedgerRejected(format!(
                "score {} exceeds {}",
                score, MAX_BPS
            )));
        }
        let threshold = self.strike_threshold;
        self.submit(
            account,
            nonce,
            LedgerOp::IssueStrike,
            Some(id),
            |tx| require_mutable(tx, id).map(|_| ()),
            |tx, _| {
                let record = require_mutable(tx, id)?;
                let strikes = if score < DEGRADED_BELOW_BPS {
                    record.strike_count + 1
                } else {
                    record.strike_count
                };
                let obsolete = strikes >= threshold;
                tx.execute(
                    "UPDATE atomics SET score = ?1, strike_count = ?2, obsolete = ?3 WHERE id = ?4",
                    params![score, strikes, obsolete as i64, id],
                )?;
                if obsolete {
                    info!(atomic_id = id, strikes, "atomic marked obsolete");
                }
                Ok(())
            },
        )
    }

    fn known_ids(&self) -> Result<Vec<String>, SynthesisError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM atomics ORDER BY registered_at, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(p) => format!("sqlite:{}", p.display()),
            None => "sqlite::memory:".to_string(),
        }
    }
}
