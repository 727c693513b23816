//! Flat `KEY=value` rendering for Conqueso clients.

use propd_core::tree;
use serde_json::{Map, Value};

/// Top-level keys that never appear in the flat rendering.
const HIDDEN: &[&str] = &["instance", "tags"];

/// Replace `consul.<service>` entries with `conqueso.<cluster>.ips=<a,b>`.
fn translate_addresses(properties: &mut Map<String, Value>) {
    let Some(Value::Object(services)) = properties.remove("consul") else {
        return;
    };
    for service in services.values() {
        let Some(cluster) = service.get("cluster").and_then(Value::as_str) else {
            continue;
        };
        let ips = service
            .get("addresses")
            .and_then(Value::as_array)
            .map(|addresses| {
                addresses
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        properties.insert(format!("conqueso.{cluster}.ips"), Value::String(ips));
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Render the merged tree as Java-style properties, one per line.
pub fn render(mut properties: Map<String, Value>) -> String {
    for key in HIDDEN {
        properties.remove(*key);
    }
    translate_addresses(&mut properties);

    tree::flatten(&properties, ".")
        .into_iter()
        .map(|(key, value)| format!("{key}={}", render_value(&value)))
        .collect::<Vec<_>>()
        .join("\n")
}
