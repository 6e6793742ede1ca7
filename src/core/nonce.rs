//! Transaction sequence numbers for the single controlling account.
//!
//! The cursor is seeded once from the ledger's pending count and advanced locally, so a
//! submission never waits on the previous confirmation just to learn its number. Any failed
//! submission other than an idempotent "already done" leaves the local view suspect; the
//! caller must `resync` before submitting again.
//!
//! `NonceSequencer` is an owned value handed around as `&mut`. It is not meant for
//! unsynchronized concurrent use; wrap it in a `Mutex` if batches ever run in parallel.

use crate::core::error::SynthesisError;
use tracing::{debug, warn};

/// Authoritative source of the account's next sequence number, pending transactions included.
pub trait NonceSource {
    fn pending_count(&self, account: &str) -> Result<u64, SynthesisError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceCursor {
    value: u64,
}

impl NonceCursor {
    pub fn value(&self) -> u64 {
        self.value
    }
}

#[derive(Debug)]
pub struct NonceSequencer {
    account: String,
    cursor: NonceCursor,
    last_issued: Option<u64>,
    issued: Vec<u64>,
    resyncs: u32,
}

impl NonceSequencer {
    pub fn seed<S: NonceSource + ?Sized>(
        source: &S,
        account: &str,
    ) -> Result<Self, SynthesisError> {
        let value = source.pending_count(account)?;
        debug!(account, seed = value, "nonce cursor seeded");
        Ok(Self {
            account: account.to_string(),
            cursor: NonceCursor { value },
            last_issued: None,
            issued: Vec::new(),
            resyncs: 0,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// The number the next call to [`NonceSequencer::next`] will hand out.
    pub fn peek(&self) -> u64 {
        self.cursor.value
    }

    pub fn next(&mut self) -> u64 {
        let n = self.cursor.value;
        self.cursor.value += 1;
        self.last_issued = Some(n);
        self.issued.push(n);
        n
    }

    /// Replace the local cursor with the ledger's pending count.
    pub fn resync<S: NonceSource + ?Sized>(&mut self, source: &S) -> Result<u64, SynthesisError> {
        let authoritative = source.pending_count(&self.account)?;
        if authoritative != self.cursor.value {
            warn!(
                account = %self.account,
                local = self.cursor.value,
                authoritative,
                "nonce cursor drifted; replacing local view"
            );
        }
        self.cursor.value = authoritative;
        self.last_issued = None;
        self.resyncs += 1;
        Ok(authoritative)
    }

    /// Hand back the most recently issued number when its submission never reached the
    /// ledger (e.g. the ledger answered "already registered" before broadcast).
    pub fn release(&mut self, number: u64) -> Result<(), SynthesisError> {
        match self.last_issued {
            Some(last) if last == number && self.cursor.value == number + 1 => {
                self.cursor.value = number;
                self.last_issued = None;
                if self.issued.last() == Some(&number) {
                    self.issued.pop();
                }
                debug!(account = %self.account, number, "nonce released");
                Ok(())
            }
            _ => Err(SynthesisError::NonceDesync(format!(
                "cannot release {} (cursor at {}, last issued {:?})",
                number, self.cursor.value, self.last_issued
            ))),
        }
    }

    /// Numbers handed out this run and not released, in issue order.
    pub fn issued(&self) -> &[u64] {
        &self.issued
    }

    pub fn resync_count(&self) -> u32 {
        self.resyncs
    }

    pub fn cursor(&self) -> NonceCursor {
        self.cursor
    }
}
