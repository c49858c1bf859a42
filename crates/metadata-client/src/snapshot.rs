//! Attribute lookup over a recursive metadata snapshot.
//!
//! Daemon attributes live under `instance/attributes` and
//! `project/attributes`. An instance-level value always wins for the same
//! key, and a per-key block flag can suppress the project fallback entirely.

use serde_json::Value;

fn attributes<'a>(snapshot: &'a Value, scope: &str) -> Option<&'a serde_json::Map<String, Value>> {
    snapshot.get(scope)?.get("attributes")?.as_object()
}

/// Instance-level attribute value, if present.
pub fn instance_attribute<'a>(snapshot: &'a Value, key: &str) -> Option<&'a str> {
    attributes(snapshot, "instance")
        .and_then(|map| map.get(key))
        .and_then(Value::as_str)
}

/// Project-level attribute value, if present.
pub fn project_attribute<'a>(snapshot: &'a Value, key: &str) -> Option<&'a str> {
    attributes(snapshot, "project")
        .and_then(|map| map.get(key))
        .and_then(Value::as_str)
}

/// Look up `key` with instance precedence over project. When `block_key`
/// names an instance attribute that resolves to true, the project fallback
/// is suppressed entirely.
pub fn attribute<'a>(snapshot: &'a Value, key: &str, block_key: Option<&str>) -> Option<&'a str> {
    if let Some(value) = instance_attribute(snapshot, key) {
        return Some(value);
    }
    if let Some(block) = block_key
        && instance_attribute(snapshot, block).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return None;
    }
    project_attribute(snapshot, key)
}

/// True when the attribute resolves to the string `true` (any case).
pub fn bool_attribute(snapshot: &Value, key: &str) -> bool {
    attribute(snapshot, key, None).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Value {
        json!({
            "instance": {"attributes": {
                "shared": "from-instance",
                "instance-only": "yes",
                "block-shared": "TRUE",
            }},
            "project": {"attributes": {
                "shared": "from-project",
                "project-only": "yes",
            }},
        })
    }

    #[test]
    fn instance_wins_over_project() {
        assert_eq!(
            attribute(&snapshot(), "shared", None),
            Some("from-instance")
        );
    }

    #[test]
    fn project_is_the_fallback() {
        assert_eq!(attribute(&snapshot(), "project-only", None), Some("yes"));
    }

    #[test]
    fn block_flag_suppresses_project_fallback() {
        assert_eq!(
            attribute(&snapshot(), "project-only", Some("block-shared")),
            None
        );
        // The block flag only matters when the instance has no value itself.
        assert_eq!(
            attribute(&snapshot(), "instance-only", Some("block-shared")),
            Some("yes")
        );
    }

    #[test]
    fn bool_attribute_is_case_insensitive() {
        let value = json!({"instance": {"attributes": {"enable-oslogin": "True"}}});
        assert!(bool_attribute(&value, "enable-oslogin"));
        assert!(!bool_attribute(&value, "absent"));
    }

    #[test]
    fn missing_scopes_yield_none() {
        assert_eq!(attribute(&json!({}), "anything", None), None);
        assert_eq!(attribute(&Value::Null, "anything", None), None);
    }
}
