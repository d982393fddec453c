//! Response-envelope normalization.
//!
//! Backend responses arrive in several shapes: a bare payload, `{<field>:
//! payload}`, `{data: payload}`, or `{data: {<field>: payload}}`. Callers
//! always get the unwrapped payload.

use serde_json::Value;

/// Unwrap a known envelope around the payload.
///
/// With `field = Some("providers")`, all of `[...]`, `{"providers": [...]}`,
/// `{"data": [...]}`, and `{"data": {"providers": [...]}}` yield `[...]`.
/// With `field = None` only the `data` wrapper is peeled. Unrecognized shapes
/// pass through untouched.
pub fn unwrap_envelope(value: Value, field: Option<&str>) -> Value {
    match value {
        Value::Object(mut map) => {
            if let Some(field) = field {
                if let Some(inner) = map.remove(field) {
                    return inner;
                }
            }
            if let Some(data) = map.remove("data") {
                return match (data, field) {
                    (Value::Object(mut inner), Some(field)) => match inner.remove(field) {
                        Some(payload) => payload,
                        None => Value::Object(inner),
                    },
                    (other, _) => other,
                };
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Best-effort item count for telemetry: length of the payload array, looking
/// one envelope level deep. Never consulted for correctness.
pub fn item_count(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("data") {
                return Some(items.len());
            }
            if let Some(Value::Object(inner)) = map.get("data") {
                return inner.values().find_map(|v| v.as_array().map(|a| a.len()));
            }
            map.values().find_map(|v| v.as_array().map(|a| a.len()))
        }
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_bare_payload() {
        let payload = json!([{"id": "aws"}]);
        assert_eq!(unwrap_envelope(payload.clone(), Some("providers")), payload);
    }

    #[test]
    fn test_unwrap_field_envelope() {
        let raw = json!({"providers": [{"id": "aws"}]});
        assert_eq!(
            unwrap_envelope(raw, Some("providers")),
            json!([{"id": "aws"}])
        );
    }

    #[test]
    fn test_unwrap_data_envelope() {
        let raw = json!({"data": [{"id": "aws"}]});
        assert_eq!(
            unwrap_envelope(raw, Some("providers")),
            json!([{"id": "aws"}])
        );
    }

    #[test]
    fn test_unwrap_nested_data_field_envelope() {
        let raw = json!({"data": {"providers": [{"id": "aws"}]}});
        assert_eq!(
            unwrap_envelope(raw, Some("providers")),
            json!([{"id": "aws"}])
        );
    }

    #[test]
    fn test_unwrap_without_field_peels_data_only() {
        let raw = json!({"data": {"status": "ok"}});
        assert_eq!(unwrap_envelope(raw, None), json!({"status": "ok"}));
        let bare = json!({"status": "ok"});
        assert_eq!(unwrap_envelope(bare.clone(), None), bare);
    }

    #[test]
    fn test_unrecognized_shape_passes_through() {
        let raw = json!({"total": 12.5});
        assert_eq!(unwrap_envelope(raw.clone(), Some("providers")), raw);
    }

    #[test]
    fn test_item_count_shapes() {
        assert_eq!(item_count(&json!([1, 2, 3])), Some(3));
        assert_eq!(item_count(&json!({"providers": [1, 2]})), Some(2));
        assert_eq!(item_count(&json!({"data": [1]})), Some(1));
        assert_eq!(item_count(&json!({"data": {"rows": [1, 2, 3, 4]}})), Some(4));
        assert_eq!(item_count(&json!({"total": 5})), None);
        assert_eq!(item_count(&json!("scalar")), None);
    }
}
