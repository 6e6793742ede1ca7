#[allow(dead_code)]
#[path = "../support/canned_http.rs"]
mod canned_http;

use canned_http::{Canned, serve};
use std::time::Duration;
use synthesis::core::error::SynthesisError;
use synthesis::core::specdoc::SpecificationDocument;
use synthesis::plugins::content_store::{
    ContentStore, ContentTag, GatewayContentStore, LOCAL_SCHEME, LocalContentStore, Pointer,
    content_id,
};
use tempfile::tempdir;

fn gateway(base: &str, upload: Option<&str>) -> GatewayContentStore {
    GatewayContentStore::new(base, upload, "ar", Duration::from_secs(5)).expect("gateway")
}

#[test]
fn local_store_is_content_addressed() {
    let tmp = tempdir().expect("tempdir");
    let store = LocalContentStore::new(&tmp.path().join("content"));
    let doc = br#"{"outcome": "A-GENESIS-01", "details": "Validate a path."}"#;

    let pointer = store
        .put(doc, &[ContentTag::new("Atomic-Id", "A-GENESIS-01")])
        .expect("put");
    assert_eq!(pointer.scheme, LOCAL_SCHEME);
    assert_eq!(pointer.cid, content_id(doc));
    assert_eq!(store.put(doc, &[]).unwrap(), pointer);

    let bytes = store.fetch(&pointer.to_string()).expect("fetch by pointer");
    let parsed = SpecificationDocument::from_bytes("A-GENESIS-01", &bytes).unwrap();
    assert_eq!(parsed.details, "Validate a path.");
    assert_eq!(store.fetch(&pointer.cid).unwrap(), bytes);
    assert!(tmp
        .path()
        .join("content")
        .join(format!("{}.tags.json", pointer.cid))
        .is_file());
}

#[test]
fn local_bundles_resolve_paths_and_refuse_escapes() {
    let tmp = tempdir().expect("tempdir");
    let store = LocalContentStore::new(tmp.path());
    let bundle = store
        .put_bundle(&[
            ("spec.md", &b"# A-1"[..]),
            ("schemas/input.json", &b"{}"[..]),
        ])
        .expect("bundle");
    let spec = Pointer {
        path: Some("spec.md".into()),
        ..bundle.clone()
    };
    assert_eq!(store.get(&spec).unwrap(), b"# A-1");
    assert_eq!(
        store
            .fetch(&format!("{}/schemas/input.json", bundle))
            .unwrap(),
        b"{}"
    );

    let reordered = store
        .put_bundle(&[
            ("schemas/input.json", &b"{}"[..]),
            ("spec.md", &b"# A-1"[..]),
        ])
        .unwrap();
    assert_eq!(reordered.cid, bundle.cid);

    let err = store.put_bundle(&[("../evil", &b"x"[..])]).unwrap_err();
    assert!(matches!(err, SynthesisError::ValidationError(_)));
    let escape = Pointer {
        path: Some("../../etc/passwd".into()),
        ..bundle
    };
    assert!(store.get(&escape).is_err());
    assert!(matches!(
        store.fetch("local://missing"),
        Err(SynthesisError::NotFound(_))
    ));
}

#[test]
fn gateway_reads_object_urls() {
    let (base, requests) = serve(vec![
        Canned::json(200, r#"{"outcome": "A-1"}"#),
        Canned::json(404, "{}"),
    ]);
    let store = gateway(&format!("{}/", base), None);

    let bytes = store.fetch("ar://cid123/spec.json").expect("fetch");
    assert_eq!(bytes, br#"{"outcome": "A-1"}"#);
    let first = requests.recv().unwrap();
    assert_eq!(first.request_line, "GET /cid123/spec.json HTTP/1.1");

    let err = store.fetch("cid404").unwrap_err();
    assert!(matches!(err, SynthesisError::NotFound(_)));
    assert_eq!(
        requests.recv().unwrap().request_line,
        "GET /cid404 HTTP/1.1"
    );
}

#[test]
fn gateway_upload_sends_tags_and_returns_pointer() {
    let (base, requests) = serve(vec![Canned::json(200, r#"{"id": "tx-abc"}"#)]);
    let store = gateway("https://unused.invalid", Some(&format!("{}/upload", base)));
    let pointer = store
        .put(b"payload", &[ContentTag::new("App-Name", "synthesis")])
        .expect("upload");
    assert_eq!(pointer.to_string(), "ar://tx-abc");

    let captured = requests.recv().unwrap();
    assert!(captured.request_line.starts_with("POST /upload"));
    assert_eq!(captured.header("X-Tag-App-Name"), Some("synthesis"));
    assert_eq!(captured.body, "payload");
}

#[test]
fn gateway_without_upload_url_cannot_publish() {
    let store = gateway("https://unused.invalid", None);
    let err = store.put(b"x", &[]).unwrap_err();
    assert!(matches!(err, SynthesisError::ConfigError(_)));
}

#[test]
fn gateway_server_errors_are_transient() {
    let (base, _requests) = serve(vec![Canned::json(503, "{}")]);
    let store = gateway(&base, None);
    let err = store.fetch("ar://cid").unwrap_err();
    assert!(matches!(err, SynthesisError::TransientNetworkError(_)));
}
