use serde_json::{Map, json};
use std::fs;
use std::time::Duration;
use synthesis::core::certify::CertifiedPayload;
use synthesis::core::config::{AuditMode, LedgerKind, SchemaPolicy, SynthesisConfig};
use synthesis::core::consensus::{self, JurorScore};
use synthesis::core::db;
use synthesis::core::error::SynthesisError;
use synthesis::core::json_extract::first_json_object;
use synthesis::core::nonce::{NonceSequencer, NonceSource};
use synthesis::core::retry::{RetryPolicy, with_retry};
use synthesis::core::schema::{self, ValidationMode};
use synthesis::core::silo::{self, AtomicRecord, SiloHealth};
use synthesis::core::specdoc::{self, SpecificationDocument};
use synthesis::core::store::{self, Store};
use synthesis::core::trace::{self, AuditEvent};
use tempfile::tempdir;

struct FixedSource(u64);

impl NonceSource for FixedSource {
    fn pending_count(&self, _account: &str) -> Result<u64, SynthesisError> {
        Ok(self.0)
    }
}

fn record(score: u32, strikes: u32, obsolete: bool) -> AtomicRecord {
    AtomicRecord {
        id: "A-GENESIS-01".to_string(),
        spec_pointer: "local://abc".to_string(),
        creator: "0x5e1f01".to_string(),
        score,
        strike_count: strikes,
        obsolete,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        cooldown: Duration::from_millis(1),
    }
}

#[test]
fn silo_bands_are_first_match_wins() {
    assert_eq!(silo::classify(&record(10_000, 0, false)), SiloHealth::Stable);
    assert_eq!(silo::classify(&record(9_500, 0, false)), SiloHealth::Stable);
    assert_eq!(silo::classify(&record(9_499, 0, false)), SiloHealth::Degraded);
    assert_eq!(silo::classify(&record(7_800, 0, false)), SiloHealth::Degraded);
    assert_eq!(silo::classify(&record(7_799, 0, false)), SiloHealth::Critical);
    assert_eq!(silo::classify(&record(10_000, 3, true)), SiloHealth::Obsolete);

    let (health, reason) = silo::classify_with_reason(&record(8_000, 1, false));
    assert_eq!(health, SiloHealth::Degraded);
    assert!(reason.contains("80.00%"));
    assert!(SiloHealth::Critical.permits_execution());
    assert!(!SiloHealth::Obsolete.permits_execution());
}

#[test]
fn unregistered_records_have_no_creator() {
    assert!(!AtomicRecord::unregistered("A-1").is_registered());
    let mut zero = record(0, 0, false);
    zero.creator = "0x0000000000000000000000000000000000000000".to_string();
    assert!(!zero.is_registered());
    assert!(record(0, 0, false).is_registered());
}

#[test]
fn score_is_bounded_and_derived_from_jury_mean() {
    assert_eq!(consensus::final_score(1.0), 9_980);
    assert_eq!(consensus::final_score(50.0), 9_000);
    assert_eq!(consensus::final_score(100.0), 8_000);
    assert_eq!(consensus::final_score(1_000.0), 0);

    let jury = vec![
        JurorScore {
            score: 10,
            verdict: None,
        },
        JurorScore {
            score: 20,
            verdict: Some("minor drift".into()),
        },
    ];
    assert!((consensus::mean_severity(&jury) - 15.0).abs() < f64::EPSILON);
}

#[test]
fn jury_output_outside_range_is_malformed() {
    let parsed = consensus::parse_jury(r#"Here you go: {"jury": [{"score": 3}, {"score": 7, "verdict": "ok"}, {"score": 12}]}"#).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[2].score, 12);
    assert_eq!(parsed[1].verdict.as_deref(), Some("ok"));

    for bad in [
        r#"{"jury": [{"score": 0}, {"score": 5}]}"#,
        r#"{"jury": [{"score": 101}]}"#,
        r#"{"jury": [{"score": 4.5}]}"#,
        r#"{"jury": []}"#,
        "no json at all",
    ] {
        let err = consensus::parse_jury(bad).unwrap_err();
        assert!(
            matches!(err, SynthesisError::OracleOutputMalformed(_)),
            "expected malformed for {}",
            bad
        );
    }
}

#[test]
fn first_json_object_skips_prose_and_fences() {
    let text = "Sure {not json} here:\n```json\n{\"verdict\": \"pass\", \"note\": \"a } b\"}\n```";
    let object = first_json_object(text).expect("object found");
    assert_eq!(object["verdict"], "pass");
    assert_eq!(object["note"], "a } b");
    assert!(first_json_object("[1, 2, 3]").is_none());
}

#[test]
fn certification_hash_is_reproducible_and_ignores_injected_hash() {
    let mut fields = Map::new();
    fields.insert("verdict".into(), json!("pass"));
    fields.insert("certificationHash".into(), json!("deadbeef"));
    let payload = CertifiedPayload::certify("A-GENESIS-01", 9_620, fields).unwrap();

    assert_eq!(payload.certification_hash.len(), 64);
    assert_ne!(payload.certification_hash, "deadbeef");
    assert!(payload.hash_matches());
    assert!(payload.certification_hash_bytes().is_some());

    let serialized = serde_json::to_value(&payload).unwrap();
    assert_eq!(serialized["logicId"], "A-GENESIS-01");
    assert_eq!(serialized["bpsVerified"], 9_620);
    assert_eq!(serialized["verdict"], "pass");

    let mut tampered = payload.clone();
    tampered.bps_verified = 10_000;
    assert!(!tampered.hash_matches());
}

#[test]
fn nonce_sequencer_issues_releases_and_resyncs() {
    let mut seq = NonceSequencer::seed(&FixedSource(7), "0xabc").unwrap();
    assert_eq!(seq.peek(), 7);
    assert_eq!(seq.next(), 7);
    assert_eq!(seq.next(), 8);
    seq.release(8).unwrap();
    assert_eq!(seq.peek(), 8);
    assert!(matches!(
        seq.release(7),
        Err(SynthesisError::NonceDesync(_))
    ));

    let jumped = seq.resync(&FixedSource(12)).unwrap();
    assert_eq!(jumped, 12);
    assert_eq!(seq.next(), 12);
    assert_eq!(seq.resync_count(), 1);
    assert_eq!(seq.issued(), &[7, 12]);
}

#[test]
fn schema_block_drives_validation_mode() {
    let spec = "# A-1\n\n## 3. JSON Schema for Input Validation\n```json\n{\"type\": \"object\", \"required\": [\"path\"]}\n```\n";
    let compiled = schema::extract(spec).expect("schema extracted");
    let ok = schema::validate(Some(&compiled), &json!({"path": ["a"]}));
    assert_eq!(ok.mode, ValidationMode::Validated);
    let bad = schema::validate(Some(&compiled), &json!({"health": 1}));
    assert_eq!(bad.mode, ValidationMode::Failed);
    assert!(!bad.ok);
    assert!(!bad.errors.is_empty());

    let broken = "## JSON Schema for Input Validation\n```json\n{not json\n```\n";
    assert!(schema::extract(broken).is_none());
    let sovereign = schema::validate(None, &json!("anything"));
    assert!(sovereign.ok);
    assert_eq!(sovereign.mode, ValidationMode::Sovereign);
}

#[test]
fn retry_stops_on_fatal_and_bounds_transient() {
    let mut calls = 0;
    let result: Result<(), _> = with_retry(fast_policy(), "registry.lookup", || {
        calls += 1;
        Err(SynthesisError::TransientNetworkError("timeout".into()))
    });
    assert!(matches!(result, Err(SynthesisError::TransientNetworkError(_))));
    assert_eq!(calls, 3);

    let mut calls = 0;
    let result: Result<(), _> = with_retry(fast_policy(), "registry.lookup", || {
        calls += 1;
        Err(SynthesisError::LedgerRejected("reverted".into()))
    });
    assert!(result.is_err());
    assert_eq!(calls, 1);

    let mut calls = 0;
    let value = with_retry(fast_policy(), "registry.lookup", || {
        calls += 1;
        if calls < 2 {
            Err(SynthesisError::TransientNetworkError("reset".into()))
        } else {
            Ok(42)
        }
    })
    .unwrap();
    assert_eq!(value, 42);
}

#[test]
fn store_layout_and_project_discovery() {
    let tmp = tempdir().expect("tempdir");
    let project = tmp.path();
    let nested = project.join("a").join("b");
    fs::create_dir_all(&nested).unwrap();
    fs::create_dir_all(project.join(".synthesis")).unwrap();

    let found = store::find_project_root(&nested).expect("project found");
    assert_eq!(found, project);

    let store = Store::for_project(project);
    store.ensure().unwrap();
    assert!(store.root.is_dir());
    assert!(store.ledger_db_path().starts_with(&store.root));
    assert_eq!(
        store::default_config_path(project),
        project.join(".synthesis").join("config.toml")
    );
}

#[test]
fn db_connect_enables_wal_and_foreign_keys() {
    let tmp = tempdir().expect("tempdir");
    let conn = db::db_connect(&tmp.path().join("nested").join("ledger.db")).unwrap();
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn audit_trail_appends_and_redacts() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path();
    for i in 0..5 {
        trace::append_event(
            root,
            AuditEvent::new(
                "pipeline.stage",
                Some("A-1"),
                "RESOLVING",
                json!({"i": i, "authorization": "Bearer sk-secret"}),
            ),
        )
        .unwrap();
    }
    let events = trace::last_events(root, 2).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].detail["i"], 4);
    assert_eq!(events[1].detail["authorization"], "[REDACTED]");
    assert!(trace::last_events(&root.join("missing"), 5).unwrap().is_empty());
}

#[test]
fn manifest_loads_in_order_and_missing_is_not_found() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("genesis_manifest.json");
    fs::write(
        &path,
        r#"[
            {"outcome": "A-GENESIS-01", "details": "first", "successBps": 9500},
            {"outcome": "A-GENESIS-02", "details": "second",
             "customOutputs": [{"fieldName": "verdict", "type": "string"}]}
        ]"#,
    )
    .unwrap();
    let docs = specdoc::load_manifest(&path).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].outcome, "A-GENESIS-01");
    assert_eq!(docs[1].field_names(), vec!["verdict"]);

    let err = specdoc::load_manifest(&tmp.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, SynthesisError::NotFound(_)));

    let markdown = SpecificationDocument::from_bytes("A-MD", b"# Just prose").unwrap();
    assert_eq!(markdown.outcome, "A-MD");
    assert!(markdown.custom_outputs.is_empty());
}

#[test]
fn config_file_overrides_defaults() {
    let tmp = tempdir().expect("tempdir");
    let project = tmp.path();
    fs::create_dir_all(project.join(".synthesis")).unwrap();
    fs::write(
        store::default_config_path(project),
        "[pipeline]\nmode = \"sweep\"\nschema_policy = \"fatal\"\nmanifest = \"specs/manifest.json\"\n",
    )
    .unwrap();
    let config = SynthesisConfig::resolve(None, project).unwrap();
    assert_eq!(config.pipeline.mode, AuditMode::Sweep);
    assert_eq!(config.pipeline.schema_policy, SchemaPolicy::Fatal);
    assert_eq!(config.ledger.kind, LedgerKind::Local);
    assert_eq!(
        config.manifest_path(project),
        project.join("specs").join("manifest.json")
    );

    let explicit = project.join("broken.toml");
    fs::write(&explicit, "[oracle]\njurors = 0\n").unwrap();
    let err = SynthesisConfig::resolve(Some(&explicit), project).unwrap_err();
    assert!(matches!(err, SynthesisError::ConfigError(_)));
}
