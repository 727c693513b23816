//! Deterministic fingerprints: source identity, payload signatures, job ids.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serialize `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Stable fingerprint of `(name, type, options)`, independent of option order.
pub fn identity(name: &str, source_type: &str, options: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    for part in [name, source_type] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(canonical_json(&Value::Object(options.clone())).as_bytes());
    hex::encode(hasher.finalize())
}

/// Signature over a parsed payload; equal content yields an equal signature.
pub fn content_signature(content: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(content).as_bytes()))
}

/// Scheduler job id for a source display string (`type.name`).
pub fn job_id(display: &str) -> String {
    hex::encode(Sha256::digest(display.trim().to_lowercase().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"d": 1, "c": [ {"z": 0, "y": 1} ]}, "a": "x"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"x","b":{"c":[{"y":1,"z":0}],"d":1}}"#
        );
    }

    #[test]
    fn identity_ignores_option_order() {
        let mut forward = Map::new();
        forward.insert("bucket".into(), json!("b"));
        forward.insert("path".into(), json!("p"));
        let mut reverse = Map::new();
        reverse.insert("path".into(), json!("p"));
        reverse.insert("bucket".into(), json!("b"));

        assert_eq!(identity("svc1", "s3", &forward), identity("svc1", "s3", &reverse));
    }

    #[test]
    fn identity_changes_with_any_component() {
        let base = opts(json!({"bucket": "b", "path": "p"}));
        let id = identity("svc1", "s3", &base);

        assert_ne!(id, identity("svc2", "s3", &base));
        assert_ne!(id, identity("svc1", "consul", &base));
        assert_ne!(id, identity("svc1", "s3", &opts(json!({"bucket": "b", "path": "q"}))));
        assert_ne!(id, identity("svc1", "s3", &opts(json!({"bucket": "b"}))));
    }

    #[test]
    fn identity_is_not_fooled_by_concatenation() {
        let empty = Map::new();
        assert_ne!(identity("ab", "c", &empty), identity("a", "bc", &empty));
    }

    #[test]
    fn content_signature_tracks_values() {
        let a = content_signature(&json!({"k": "v", "j": 1}));
        let b = content_signature(&json!({"j": 1, "k": "v"}));
        let c = content_signature(&json!({"j": 1, "k": "changed"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn job_id_normalizes_display() {
        assert_eq!(job_id("s3.svc1"), job_id("  S3.SVC1 "));
        assert_ne!(job_id("s3.svc1"), job_id("s3.svc2"));
        assert_eq!(job_id("s3.svc1").len(), 64);
    }
}
