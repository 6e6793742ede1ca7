use synthesis::core::error::SynthesisError;
use synthesis::core::nonce::{NonceSequencer, NonceSource};
use synthesis::core::silo::{self, MAX_BPS, SiloHealth};
use synthesis::plugins::ledger::{Ledger, LedgerOp};
use synthesis::plugins::sqlite_ledger::SqliteLedger;
use tempfile::tempdir;

const ACCOUNT: &str = "0x00000000000000000000000000000000005e1f01";

fn prepared(ledger: &SqliteLedger, balance: u64, allowance: u64) {
    ledger.credit(ACCOUNT, balance).expect("credit");
    let nonce = ledger.pending_count(ACCOUNT).expect("pending");
    ledger.approve(ACCOUNT, allowance, nonce).expect("approve");
}

#[test]
fn state_survives_reopen() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("ledger.db");
    {
        let ledger = SqliteLedger::open(&path, 3).expect("open");
        prepared(&ledger, 100, 20);
        ledger
            .register(ACCOUNT, "A-GENESIS-01", "local://cid1", ACCOUNT, 1)
            .expect("register");
        ledger
            .anchor_score(ACCOUNT, "A-GENESIS-01", 9_100, &"cd".repeat(32), 2)
            .expect("anchor");
    }
    let reopened = SqliteLedger::open(&path, 3).expect("reopen");
    assert_eq!(reopened.pending_count(ACCOUNT).unwrap(), 3);
    assert_eq!(reopened.known_ids().unwrap(), vec!["A-GENESIS-01".to_string()]);
    assert_eq!(reopened.pulses("A-GENESIS-01").unwrap().len(), 1);
    assert_eq!(reopened.balance(ACCOUNT).unwrap(), 98);
    assert_eq!(reopened.allowance(ACCOUNT).unwrap(), 18);
    assert!(reopened.describe().starts_with("sqlite:"));
}

#[test]
fn sequenced_submissions_are_contiguous() {
    let ledger = SqliteLedger::in_memory().expect("ledger");
    prepared(&ledger, 100, 50);
    let mut seq = NonceSequencer::seed(&ledger, ACCOUNT).expect("seed");
    let seed = seq.peek();

    for id in ["A-1", "A-2", "A-3"] {
        let nonce = seq.next();
        let receipt = ledger
            .register(ACCOUNT, id, "local://x", ACCOUNT, nonce)
            .expect("register");
        assert_eq!(receipt.nonce, nonce);
        assert_eq!(receipt.op, LedgerOp::Register);
        assert!(receipt.tx_hash.starts_with("0x"));
    }
    assert_eq!(seq.issued(), &[seed, seed + 1, seed + 2]);
    assert_eq!(
        ledger.confirmed_nonces(ACCOUNT).unwrap(),
        vec![0, seed, seed + 1, seed + 2]
    );
}

#[test]
fn fees_exhaust_balance_before_allowance() {
    let ledger = SqliteLedger::in_memory().expect("ledger");
    prepared(&ledger, 1, 10);
    ledger
        .register(ACCOUNT, "A-1", "local://x", ACCOUNT, 1)
        .expect("first register");
    let err = ledger
        .register(ACCOUNT, "A-2", "local://y", ACCOUNT, 2)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::LedgerRejected(ref m) if m.contains("balance")));
    assert_eq!(ledger.pending_count(ACCOUNT).unwrap(), 2);
    assert!(!ledger.lookup("A-2").unwrap().is_registered());
}

#[test]
fn approve_replaces_allowance_and_costs_no_fee() {
    let ledger = SqliteLedger::in_memory().expect("ledger");
    ledger.credit(ACCOUNT, 5).unwrap();
    ledger.approve(ACCOUNT, 40, 0).unwrap();
    ledger.approve(ACCOUNT, 7, 1).unwrap();
    assert_eq!(ledger.allowance(ACCOUNT).unwrap(), 7);
    assert_eq!(ledger.balance(ACCOUNT).unwrap(), 5);
}

#[test]
fn strike_threshold_is_configurable() {
    let tmp = tempdir().expect("tempdir");
    let ledger = SqliteLedger::open(&tmp.path().join("l.db"), 1).expect("open");
    prepared(&ledger, 10, 10);
    ledger.register(ACCOUNT, "A-1", "local://x", ACCOUNT, 1).unwrap();
    ledger.issue_strike(ACCOUNT, "A-1", 9_400, 2).unwrap();

    let record = ledger.lookup("A-1").unwrap();
    assert_eq!(record.score, 9_400);
    assert!(record.obsolete);
    assert_eq!(silo::classify(&record), SiloHealth::Obsolete);
    let err = ledger
        .anchor_score(ACCOUNT, "A-1", MAX_BPS, &"ef".repeat(32), 3)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::LedgerRejected(ref m) if m.contains("obsolete")));
}

#[test]
fn mutations_on_unknown_ids_are_rejected() {
    let ledger = SqliteLedger::in_memory().expect("ledger");
    prepared(&ledger, 10, 10);
    let err = ledger.issue_strike(ACCOUNT, "A-404", 5_000, 1).unwrap_err();
    assert!(matches!(err, SynthesisError::LedgerRejected(ref m) if m.contains("not registered")));
    let err = ledger
        .anchor_score(ACCOUNT, "A-404", 5_000, &"00".repeat(32), 1)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::LedgerRejected(_)));
    assert_eq!(ledger.pending_count(ACCOUNT).unwrap(), 1);
    let err = ledger
        .anchor_score(ACCOUNT, "A-404", MAX_BPS + 1, &"00".repeat(32), 1)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::LedgerRejected(ref m) if m.contains("exceeds")));
}

#[test]
fn unsigned_quantities_round_trip_through_sqlite() {
    let ledger = SqliteLedger::in_memory().expect("ledger");
    let large = i64::MAX as u64 - 1;
    assert_eq!(ledger.credit(ACCOUNT, large).expect("credit"), large);
    assert_eq!(ledger.balance(ACCOUNT).unwrap(), large);
    ledger.approve(ACCOUNT, large, 0).expect("approve");
    assert_eq!(ledger.allowance(ACCOUNT).unwrap(), large);
    assert_eq!(ledger.confirmed_nonces(ACCOUNT).unwrap(), vec![0]);

    let err = ledger.credit("0xfeed", u64::MAX).unwrap_err();
    assert!(matches!(err, SynthesisError::RusqliteError(_)));
    assert_eq!(ledger.balance("0xfeed").unwrap(), 0);
}
