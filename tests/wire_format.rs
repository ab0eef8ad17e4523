//! Wire format conformance tests
//!
//! Validates that `Envelope` serialization matches the committed JSON
//! fixtures in tests/fixtures/envelopes/. Any process speaking the envelope
//! protocol can be checked against the same files.
//!
//! ## Fixture regeneration
//!
//! To regenerate fixtures after an intentional wire format change:
//! ```bash
//! REGENERATE_FIXTURES=1 cargo test --test wire_format
//! ```

use serde_json::{json, Value};
use shard_host::protocol::envelope::{Envelope, FieldMap};
use shard_host::protocol::Channel;
use shard_host::CallErrorKind;
use std::path::PathBuf;

/// Fixture directory resolved via CARGO_MANIFEST_DIR.
fn fixtures_dir() -> PathBuf {
    let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/envelopes");
    assert!(
        fixtures.exists(),
        "Fixture directory does not exist at {}",
        fixtures.display()
    );
    fixtures
}

/// Load a committed fixture by name (without .json extension).
fn load_fixture(name: &str) -> Value {
    let path = fixtures_dir().join(format!("{name}.json"));
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {e}", path.display()));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {e}", path.display()))
}

fn fields(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Build the envelope each fixture describes with deterministic inputs.
fn build_deterministic_envelope(fixture_name: &str) -> Envelope {
    match fixture_name {
        "call" => Envelope::Call {
            shard_id: "close-policy".into(),
            operation: "answerClose".into(),
            args: vec![json!("quit"), json!(true)],
            correlation_id: "00000000-0000-4000-8000-000000000001".into(),
        },
        "call-result" => Envelope::CallResult {
            correlation_id: "00000000-0000-4000-8000-000000000001".into(),
            result: json!("quit"),
        },
        "call-error" => Envelope::CallError {
            correlation_id: "00000000-0000-4000-8000-000000000002".into(),
            kind: CallErrorKind::CallTargetNotFound,
            message: "no operation 'doThing' on shard 'ghost-shard'".into(),
        },
        "subscribe" => Envelope::Subscribe {
            shard_id: "app-common".into(),
        },
        "snapshot" => Envelope::Snapshot {
            shard_id: "app-common".into(),
            sequence: 0,
            fields: fields(json!({
                "version": "0.1.0",
                "startedAt": 1700000000000_u64,
                "hardwareAcceleration": true,
                "shuttingDown": false
            })),
        },
        "patch" => Envelope::Patch {
            shard_id: "app-common".into(),
            sequence: 1,
            fields: fields(json!({ "hardwareAcceleration": false })),
        },
        "subscribe-error" => Envelope::SubscribeError {
            shard_id: "close-policy".into(),
            kind: CallErrorKind::ShardNotReady,
            message: "cannot subscribe to shard 'close-policy': shard is failed".into(),
        },
        "event" => Envelope::Event {
            topic: "app-common/second-instance".into(),
            payload: json!([["--minimized"], "/home/user"]),
        },
        "unsubscribe" => Envelope::Unsubscribe {
            shard_id: "app-common".into(),
        },
        other => panic!("Unknown fixture: {other}"),
    }
}

/// Write a fixture to disk (for regeneration mode).
fn write_fixture(name: &str, value: &Value) {
    let path = fixtures_dir().join(format!("{name}.json"));
    let content = serde_json::to_string_pretty(value).unwrap();
    let content = format!("{content}\n");
    std::fs::write(&path, content)
        .unwrap_or_else(|e| panic!("Failed to write fixture {}: {e}", path.display()));
    eprintln!("Regenerated fixture: {}", path.display());
}

/// Every envelope type, one fixture each.
const ALL_FIXTURES: &[&str] = &[
    "call",
    "call-result",
    "call-error",
    "subscribe",
    "snapshot",
    "patch",
    "subscribe-error",
    "event",
    "unsubscribe",
];

/// Fixtures addressed to a shard carry `shardId`.
const SHARD_ADDRESSED: &[&str] = &[
    "call",
    "subscribe",
    "snapshot",
    "patch",
    "subscribe-error",
    "unsubscribe",
];

#[test]
fn rust_serialization_matches_committed_fixtures() {
    let regenerate = std::env::var("REGENERATE_FIXTURES").is_ok();

    for name in ALL_FIXTURES {
        let actual = serde_json::to_value(build_deterministic_envelope(name)).unwrap();

        if regenerate {
            write_fixture(name, &actual);
        } else {
            let expected = load_fixture(name);
            assert_eq!(
                actual, expected,
                "Wire format mismatch for fixture '{name}'. \
                 If intentional, run: REGENERATE_FIXTURES=1 cargo test --test wire_format"
            );
        }
    }
}

#[test]
fn fixtures_parse_into_the_same_envelope() {
    for name in ALL_FIXTURES {
        let text = load_fixture(name).to_string();
        let parsed = Envelope::from_json(&text)
            .unwrap_or_else(|e| panic!("Fixture '{name}' does not parse: {e}"));
        assert_eq!(parsed, build_deterministic_envelope(name), "fixture '{name}'");
    }
}

#[test]
fn fixture_type_tag_matches_file_name() {
    for name in ALL_FIXTURES {
        let fixture = load_fixture(name);
        assert_eq!(fixture["type"], json!(name), "fixture '{name}'");
        assert_eq!(build_deterministic_envelope(name).kind(), *name);
    }
}

#[test]
fn shard_addressed_fixtures_use_camel_case_keys() {
    for name in SHARD_ADDRESSED {
        let fixture = load_fixture(name);
        let obj = fixture.as_object().unwrap();
        assert!(obj.contains_key("shardId"), "fixture '{name}' missing shardId");
        assert!(!obj.contains_key("shard_id"), "fixture '{name}' has snake_case key");
    }
}

#[test]
fn correlation_ids_are_valid_uuids() {
    for name in ["call", "call-result", "call-error"] {
        let fixture = load_fixture(name);
        let id = fixture["correlationId"]
            .as_str()
            .unwrap_or_else(|| panic!("Fixture '{name}' has non-string correlationId"));
        uuid::Uuid::parse_str(id)
            .unwrap_or_else(|e| panic!("Fixture '{name}' has invalid correlationId '{id}': {e}"));
    }
}

#[test]
fn event_topic_follows_channel_convention() {
    let fixture = load_fixture("event");
    let topic = fixture["topic"].as_str().unwrap();
    let channel = Channel::parse(topic).expect("topic should be '<shardId>/<member>'");
    assert_eq!(channel.shard_id, "app-common");
    assert_eq!(channel.member, "second-instance");
}
