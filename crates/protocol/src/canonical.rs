//! Canonical JSON encoding.
//!
//! Object keys are sorted recursively and the output carries no
//! insignificant whitespace, so the same value always encodes to the same
//! bytes. These bytes are what gets signed and verified.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ProtocolResult};
use crate::model::TaskPlan;

/// Returns a copy of `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_bytes<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&canonicalize(&value))?)
}

/// Re-encodes received JSON text canonically, whatever its original key
/// order or formatting.
pub fn canonical_from_str(raw: &str) -> ProtocolResult<Vec<u8>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ProtocolError::InvalidPayload(err.to_string()))?;
    Ok(serde_json::to_vec(&canonicalize(&value))?)
}

pub fn encode_plan(plan: &TaskPlan) -> ProtocolResult<String> {
    let bytes = canonical_bytes(plan)?;
    String::from_utf8(bytes).map_err(|err| ProtocolError::InvalidPayload(err.to_string()))
}

/// Decodes a plan. Any shape error, including an empty step list, is
/// reported as `InvalidPayload`.
pub fn decode_plan(raw: &str) -> ProtocolResult<TaskPlan> {
    serde_json::from_str(raw).map_err(|err| ProtocolError::InvalidPayload(err.to_string()))
}

/// Reads `task_id` out of unverified plan JSON. Only use the result to
/// address a rejection, never to make a trust decision.
pub fn peek_task_id(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value
        .get("task_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskConstraints, TaskStep};
    use serde_json::json;

    fn sample_plan() -> TaskPlan {
        TaskPlan::new(
            vec![
                TaskStep::local("scan_directory").with_param("path", "/tmp"),
                TaskStep::local("generate_report").with_param("format", "text"),
            ],
            TaskConstraints::default(),
        )
        .unwrap()
    }

    #[test]
    fn encoding_is_deterministic() {
        let plan = sample_plan();
        assert_eq!(encode_plan(&plan).unwrap(), encode_plan(&plan).unwrap());
    }

    #[test]
    fn key_order_does_not_change_bytes() {
        let a = canonical_from_str(r#"{"b": 1, "a": {"y": [1, {"d": 2, "c": 3}], "x": null}}"#)
            .unwrap();
        let b = canonical_from_str(r#"{"a":{"x":null,"y":[1,{"c":3,"d":2}]},"b":1}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            String::from_utf8(a).unwrap(),
            r#"{"a":{"x":null,"y":[1,{"c":3,"d":2}]},"b":1}"#
        );
    }

    #[test]
    fn decode_round_trips_encoded_plan() {
        let plan = sample_plan();
        let decoded = decode_plan(&encode_plan(&plan).unwrap()).unwrap();
        assert_eq!(decoded, plan);
        assert_eq!(canonical_bytes(&decoded).unwrap(), canonical_bytes(&plan).unwrap());
    }

    #[test]
    fn malformed_payloads_are_invalid() {
        assert!(matches!(
            decode_plan("not json"),
            Err(ProtocolError::InvalidPayload(_))
        ));
        let empty = json!({"task_id": "task_1", "steps": [], "created_at": "2024-01-01T00:00:00Z"});
        assert!(matches!(
            decode_plan(&empty.to_string()),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn peek_reads_task_id_only_when_present() {
        assert_eq!(
            peek_task_id(r#"{"task_id":"task_0123456789ab"}"#).as_deref(),
            Some("task_0123456789ab")
        );
        assert_eq!(peek_task_id("{}"), None);
        assert_eq!(peek_task_id("garbage"), None);
    }
}
