//! Wire-format stability tests for schema types
//!
//! Status codes are read back by unrelated process invocations, possibly
//! built from older sources, so the serialized form is pinned down here.

use crate::{Params, PidFilter, ProcessKind, TaskStatus};
use serde_json::json;

#[test]
fn task_status_serializes_as_numeric_code() {
    assert_eq!(serde_json::to_string(&TaskStatus::Pending).unwrap(), "0");
    assert_eq!(serde_json::to_string(&TaskStatus::Running).unwrap(), "1");
    assert_eq!(serde_json::to_string(&TaskStatus::Finished).unwrap(), "2");
    assert_eq!(serde_json::to_string(&TaskStatus::Canceled).unwrap(), "3");
    assert_eq!(serde_json::to_string(&TaskStatus::Undefined).unwrap(), "4");
}

#[test]
fn task_status_deserializes_from_numeric_code() {
    let status: TaskStatus = serde_json::from_str("1").unwrap();
    assert_eq!(status, TaskStatus::Running);

    let status: TaskStatus = serde_json::from_str("3").unwrap();
    assert_eq!(status, TaskStatus::Canceled);
}

#[test]
fn task_status_rejects_unknown_codes() {
    assert!(serde_json::from_str::<TaskStatus>("9").is_err());
    assert!(serde_json::from_str::<TaskStatus>("\"running\"").is_err());
}

#[test]
fn task_status_roundtrip_all_variants() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Finished,
        TaskStatus::Canceled,
        TaskStatus::Undefined,
    ] {
        let encoded = serde_json::to_string(&status).unwrap();
        let decoded: TaskStatus = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, status);
    }
}

#[test]
fn process_kind_roundtrip() {
    for kind in [ProcessKind::Worker, ProcessKind::Publisher] {
        let encoded = serde_json::to_string(&kind).unwrap();
        let decoded: ProcessKind = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, kind);
    }
}

#[test]
fn pid_filter_roundtrip() {
    for filter in [PidFilter::All, PidFilter::Worker, PidFilter::Publisher] {
        let encoded = serde_json::to_string(&filter).unwrap();
        let decoded: PidFilter = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, filter);
    }
}

#[test]
fn params_roundtrip_preserves_order_and_values() {
    let mut params = Params::new();
    params
        .set("input", json!("/tmp/data"))
        .set("attempts", json!(2))
        .set("flags", json!(["a", "b"]));

    let encoded = serde_json::to_vec(&params).unwrap();
    let decoded: Params = serde_json::from_slice(&encoded).unwrap();

    assert_eq!(decoded, params);
    let keys: Vec<_> = decoded.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(keys, vec!["input", "attempts", "flags"]);
}
