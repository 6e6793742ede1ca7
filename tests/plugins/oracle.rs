#[allow(dead_code)]
#[path = "../support/canned_http.rs"]
mod canned_http;

use canned_http::{Canned, serve};
use serde_json::Value;
use std::time::Duration;
use synthesis::core::error::SynthesisError;
use synthesis::plugins::oracle::{ChatMessage, ChatRequest, HttpOracle, ScoringOracle};

fn request() -> ChatRequest {
    ChatRequest::new(
        "grok-3",
        vec![
            ChatMessage::system("You are the jury."),
            ChatMessage::user("findings..."),
        ],
    )
}

#[test]
fn buffered_completion_returns_first_choice() {
    let (base, requests) = serve(vec![Canned::json(
        200,
        r#"{"choices":[{"message":{"role":"assistant","content":"{\"jury\": [{\"score\": 4}]}"}}]}"#,
    )]);
    let oracle = HttpOracle::new(
        &format!("{}/v1/chat/completions", base),
        "test-key",
        Duration::from_secs(5),
        false,
    )
    .expect("oracle");

    let text = oracle.complete(&request()).expect("complete");
    assert_eq!(text, r#"{"jury": [{"score": 4}]}"#);

    let captured = requests.recv().unwrap();
    assert!(captured.request_line.starts_with("POST /v1/chat/completions"));
    assert_eq!(captured.header("authorization"), Some("Bearer test-key"));
    let sent: Value = serde_json::from_str(&captured.body).unwrap();
    assert_eq!(sent["model"], "grok-3");
    assert_eq!(sent["messages"][0]["role"], "system");
    assert!(sent.get("stream").is_none());
}

#[test]
fn streaming_completion_concatenates_deltas() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"drift: \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"none found\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let (base, requests) = serve(vec![Canned::event_stream(body)]);
    let oracle = HttpOracle::new(&base, "test-key", Duration::from_secs(5), true).expect("oracle");

    assert_eq!(oracle.complete(&request()).unwrap(), "drift: none found");
    let sent: Value = serde_json::from_str(&requests.recv().unwrap().body).unwrap();
    assert_eq!(sent["stream"], true);
}

#[test]
fn rate_limits_are_transient_and_client_errors_are_not() {
    let (base, _requests) = serve(vec![Canned::json(429, "{}"), Canned::json(401, "{}")]);
    let oracle = HttpOracle::new(&base, "test-key", Duration::from_secs(5), false).expect("oracle");

    let err = oracle.complete(&request()).unwrap_err();
    assert!(matches!(err, SynthesisError::TransientNetworkError(_)));
    let err = oracle.complete(&request()).unwrap_err();
    assert!(matches!(err, SynthesisError::HttpError(_)));
}

#[test]
fn envelope_without_choices_is_malformed() {
    let (base, _requests) = serve(vec![Canned::json(200, r#"{"choices": []}"#)]);
    let oracle = HttpOracle::new(&base, "test-key", Duration::from_secs(5), false).expect("oracle");
    let err = oracle.complete(&request()).unwrap_err();
    assert!(matches!(err, SynthesisError::OracleOutputMalformed(_)));
}

#[test]
fn unreachable_endpoint_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let oracle = HttpOracle::new(
        &format!("http://{}", addr),
        "test-key",
        Duration::from_secs(2),
        false,
    )
    .expect("oracle");
    let err = oracle.complete(&request()).unwrap_err();
    assert!(matches!(err, SynthesisError::TransientNetworkError(_)));
}
