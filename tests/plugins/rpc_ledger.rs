#[allow(dead_code)]
#[path = "../support/canned_http.rs"]
mod canned_http;

use canned_http::{Canned, serve};
use serde_json::{Value, json};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use synthesis::core::config::SchemaPolicy;
use synthesis::core::error::SynthesisError;
use synthesis::core::nonce::NonceSource;
use synthesis::core::pipeline::{LedgerSession, PipelineSettings};
use synthesis::core::retry::RetryPolicy;
use synthesis::plugins::ledger::{Ledger, LedgerOp, ReadCapability};
use synthesis::plugins::rpc_ledger::{RpcLedger, hashed_id};

const ACCOUNT: &str = "0x00000000000000000000000000000000005e1f01";

fn ok(result: Value) -> Canned {
    Canned::json(200, json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
}

fn rpc_error(code: i64, message: &str) -> Canned {
    Canned::json(
        200,
        json!({"jsonrpc": "2.0", "id": 1, "error": {"code": code, "message": message}}).to_string(),
    )
}

fn ledger(responses: Vec<Canned>) -> (RpcLedger, Receiver<canned_http::Captured>) {
    let (base, requests) = serve(responses);
    let ledger = RpcLedger::new(&base, "ledger-token", Duration::from_secs(5))
        .expect("ledger")
        .with_receipt_polling(Duration::from_millis(1), 5);
    (ledger, requests)
}

fn method_of(captured: &canned_http::Captured) -> (String, Value) {
    let body: Value = serde_json::from_str(&captured.body).expect("json-rpc body");
    (
        body["method"].as_str().unwrap_or_default().to_string(),
        body["params"].clone(),
    )
}

#[test]
fn lookup_negotiates_once_then_reuses_capability() {
    let (ledger, requests) = ledger(vec![
        rpc_error(-32601, "method not found"),
        ok(json!(["ar://cid1", "0xabc", "0x2580", 1, false])),
        ok(json!(["ar://cid2", "0xabc", 9_900, 0, "0x0"])),
    ]);

    let record = ledger.lookup("A-1").expect("first lookup");
    assert_eq!(record.score, 9_600);
    assert_eq!(record.strike_count, 1);
    assert!(record.is_registered());
    assert_eq!(
        ledger.negotiated_capability(),
        Some(ReadCapability::RegistryTuple)
    );

    let second = ledger.lookup("A-2").expect("second lookup");
    assert_eq!(second.spec_pointer, "ar://cid2");
    assert!(!second.obsolete);

    let methods: Vec<String> = (0..3).map(|_| method_of(&requests.recv().unwrap()).0).collect();
    assert_eq!(
        methods,
        vec![
            "synthesis_registry",
            "synthesis_registryTuple",
            "synthesis_registryTuple"
        ]
    );
}

#[test]
fn hash_registry_is_the_last_resort() {
    let (ledger, requests) = ledger(vec![
        rpc_error(-32601, "method not found"),
        rpc_error(-32601, "method not found"),
        ok(json!({"cid": "ar://h", "creator": "0xabc", "bps": 7_000, "strikes": 2, "isObsolete": false})),
    ]);
    let record = ledger.lookup("A-H").expect("lookup");
    assert_eq!(record.score, 7_000);
    assert_eq!(
        ledger.negotiated_capability(),
        Some(ReadCapability::RegistryByHash)
    );
    let last = (0..3).map(|_| requests.recv().unwrap()).last().unwrap();
    let (method, params) = method_of(&last);
    assert_eq!(method, "synthesis_registryByHash");
    assert_eq!(params[0], hashed_id("A-H"));
}

#[test]
fn transient_read_does_not_fix_a_capability() {
    let (ledger, _requests) = ledger(vec![rpc_error(-32005, "limit exceeded")]);
    let err = ledger.lookup("A-1").unwrap_err();
    assert!(matches!(err, SynthesisError::TransientNetworkError(_)));
    assert_eq!(ledger.negotiated_capability(), None);
}

#[test]
fn writes_wait_for_a_successful_receipt() {
    let (ledger, requests) = ledger(vec![
        ok(json!("0xfeed")),
        ok(Value::Null),
        ok(json!({"status": "0x1"})),
    ]);
    let receipt = ledger
        .anchor_score(ACCOUNT, "A-1", 9_100, &"ab".repeat(32), 26)
        .expect("anchor");
    assert_eq!(receipt.tx_hash, "0xfeed");
    assert_eq!(receipt.nonce, 26);
    assert_eq!(receipt.op, LedgerOp::AnchorScore);

    let (method, params) = method_of(&requests.recv().unwrap());
    assert_eq!(method, "synthesis_sendTransaction");
    assert_eq!(params[0]["nonce"], "0x1a");
    assert_eq!(params[0]["op"], "anchor_score");
    assert_eq!(params[0]["args"]["bps"], 9_100);
    let (method, _) = method_of(&requests.recv().unwrap());
    assert_eq!(method, "synthesis_getTransactionReceipt");
}

#[test]
fn reverted_receipt_is_rejected_not_already_done() {
    let (ledger, _requests) = ledger(vec![
        ok(json!("0xdead")),
        ok(json!({"status": false, "revertReason": "atomic is obsolete"})),
    ]);
    let err = ledger.issue_strike(ACCOUNT, "A-1", 5_000, 3).unwrap_err();
    assert!(matches!(err, SynthesisError::LedgerRejected(ref m) if m.contains("obsolete")));
}

#[test]
fn missing_receipt_is_unconfirmed_not_transient() {
    let mut responses = vec![ok(json!("0xaaa"))];
    responses.extend((0..5).map(|_| ok(Value::Null)));
    let (ledger, _requests) = ledger(responses);
    let err = ledger.issue_strike(ACCOUNT, "A-1", 7_000, 5).unwrap_err();
    assert!(matches!(err, SynthesisError::UnconfirmedBroadcast(ref m) if m.contains("0xaaa")));
}

#[test]
fn strike_without_receipt_is_broadcast_exactly_once() {
    let mut responses = vec![ok(json!("0x5")), ok(json!(100)), ok(json!("0xaaa"))];
    responses.extend((0..5).map(|_| ok(Value::Null)));
    responses.push(ok(json!("0x6")));
    // A resend would find these waiting.
    responses.push(ok(json!("0xbbb")));
    responses.push(ok(json!({"status": "0x1"})));
    let (ledger, requests) = ledger(responses);
    let settings = PipelineSettings {
        account: ACCOUNT.to_string(),
        creator: ACCOUNT.to_string(),
        schema_policy: SchemaPolicy::Advisory,
        retry: RetryPolicy {
            max_attempts: 3,
            cooldown: Duration::from_millis(1),
        },
        min_allowance: 10,
        approve_amount: 100,
    };
    let mut session = LedgerSession::open(&ledger, settings).expect("session");

    let err = session.issue_strike("A-1", 7_000).unwrap_err();
    assert!(matches!(err, SynthesisError::UnconfirmedBroadcast(_)));
    assert_eq!(session.sequencer().peek(), 6);

    drop(session);
    drop(ledger);
    let sends: Vec<Value> = requests
        .try_iter()
        .map(|c| method_of(&c))
        .filter(|(method, _)| method == "synthesis_sendTransaction")
        .map(|(_, params)| params[0]["nonce"].clone())
        .collect();
    assert_eq!(sends, vec![json!("0x5")]);
}

#[test]
fn submission_errors_follow_the_failure_taxonomy() {
    let (ledger, _requests) = ledger(vec![
        rpc_error(-32000, "execution reverted: already registered"),
        rpc_error(-32000, "nonce too low"),
    ]);
    let err = ledger
        .register(ACCOUNT, "A-1", "ar://cid", ACCOUNT, 0)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::AlreadyDone(_)));
    let err = ledger.approve(ACCOUNT, 100, 0).unwrap_err();
    assert!(matches!(err, SynthesisError::NonceDesync(_)));
}

#[test]
fn account_reads_parse_quantities() {
    let (ledger, requests) = ledger(vec![ok(json!("0x1a")), ok(json!("250")), ok(json!(42))]);
    assert_eq!(ledger.pending_count(ACCOUNT).unwrap(), 26);
    assert_eq!(ledger.allowance(ACCOUNT).unwrap(), 250);
    assert_eq!(ledger.balance(ACCOUNT).unwrap(), 42);

    let first = requests.recv().unwrap();
    assert_eq!(first.header("authorization"), Some("Bearer ledger-token"));
    let (method, params) = method_of(&first);
    assert_eq!(method, "eth_getTransactionCount");
    assert_eq!(params, json!([ACCOUNT, "pending"]));
}

#[test]
fn empty_token_is_a_missing_credential() {
    let err = RpcLedger::new("http://127.0.0.1:1", "  ", Duration::from_secs(1)).err();
    assert!(matches!(err, Some(SynthesisError::MissingCredential(_))));
}
