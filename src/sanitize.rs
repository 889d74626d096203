//! Metadata normalization for the vector index.
//!
//! The index stores only primitive metadata values (string, integer, float,
//! boolean, null). Extractors occasionally attach lists or nested maps, so
//! those are flattened to their JSON text before submission, and again when
//! the index rejects a batch.

use serde_json::Value;

use crate::models::Metadata;

/// Result of [`sanitize`]: the cleaned map plus the keys that were rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub metadata: Metadata,
    pub converted: Vec<String>,
}

impl Sanitized {
    pub fn changed(&self) -> bool {
        !self.converted.is_empty()
    }
}

/// Replace every list or map value with its JSON string form.
///
/// Primitive values pass through untouched, so applying this twice yields
/// the same map and an empty `converted` list on the second pass.
pub fn sanitize(metadata: &Metadata) -> Sanitized {
    let mut converted = Vec::new();
    let metadata = metadata
        .iter()
        .map(|(key, value)| {
            if is_primitive(value) {
                (key.clone(), value.clone())
            } else {
                converted.push(key.clone());
                (key.clone(), Value::String(value.to_string()))
            }
        })
        .collect();
    Sanitized {
        metadata,
        converted,
    }
}

/// Sanitize in place. Returns the keys that were converted.
pub fn sanitize_in_place(metadata: &mut Metadata) -> Vec<String> {
    let mut converted = Vec::new();
    for (key, value) in metadata.iter_mut() {
        if !is_primitive(value) {
            *value = Value::String(value.to_string());
            converted.push(key.clone());
        }
    }
    converted
}

pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// First key whose value the index would reject, with the value's kind.
pub fn first_non_primitive(metadata: &Metadata) -> Option<(&str, &'static str)> {
    metadata
        .iter()
        .find(|(_, v)| !is_primitive(v))
        .map(|(k, v)| (k.as_str(), value_kind(v)))
}

pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn primitives_untouched() {
        let m = meta(&[
            ("name", json!("notes.md")),
            ("size", json!(42)),
            ("ratio", json!(0.5)),
            ("hidden", json!(false)),
            ("owner", Value::Null),
        ]);
        let out = sanitize(&m);
        assert_eq!(out.metadata, m);
        assert!(!out.changed());
    }

    #[test]
    fn lists_and_maps_become_strings() {
        let m = meta(&[
            ("languages", json!(["en", "de"])),
            ("author", json!({"name": "Ada"})),
            ("title", json!("Report")),
        ]);
        let out = sanitize(&m);
        assert_eq!(out.metadata["languages"], json!("[\"en\",\"de\"]"));
        assert_eq!(out.metadata["author"], json!("{\"name\":\"Ada\"}"));
        assert_eq!(out.metadata["title"], json!("Report"));
        assert_eq!(out.converted, vec!["author".to_string(), "languages".to_string()]);
    }

    #[test]
    fn idempotent() {
        let m = meta(&[("tags", json!(["a", ["b"]])), ("n", json!(1))]);
        let once = sanitize(&m);
        let twice = sanitize(&once.metadata);
        assert_eq!(once.metadata, twice.metadata);
        assert!(twice.converted.is_empty());
    }

    #[test]
    fn in_place_matches_pure_form() {
        let m = meta(&[("tags", json!(["x"])), ("n", json!(3))]);
        let mut owned = m.clone();
        let converted = sanitize_in_place(&mut owned);
        assert_eq!(owned, sanitize(&m).metadata);
        assert_eq!(converted, vec!["tags".to_string()]);
    }

    #[test]
    fn reports_first_offender() {
        let m = meta(&[("a", json!(1)), ("b", json!([1, 2]))]);
        assert_eq!(first_non_primitive(&m), Some(("b", "list")));
        assert_eq!(first_non_primitive(&sanitize(&m).metadata), None);
    }
}
