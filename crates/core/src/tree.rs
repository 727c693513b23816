//! Helpers for building the merged property tree.

use serde_json::{Map, Value};

/// Separator between namespace segments (`instance:tags`).
pub const NAMESPACE_DELIMITER: char = ':';

/// Place `properties` under the path named by `namespace`.
///
/// An empty namespace mounts the properties at the root.
pub fn mount(namespace: &str, properties: Map<String, Value>) -> Map<String, Value> {
    let segments: Vec<&str> = namespace
        .split(NAMESPACE_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    segments
        .into_iter()
        .rev()
        .fold(properties, |inner, segment| {
            let mut outer = Map::new();
            outer.insert(segment.to_string(), Value::Object(inner));
            outer
        })
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in `overlay` replaces what `base` held.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, incoming) in overlay {
        match (base.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, incoming) => {
                base.insert(key, incoming);
            }
        }
    }
}

/// Merge trees in order; later trees win on conflict.
pub fn merge_all<I>(trees: I) -> Map<String, Value>
where
    I: IntoIterator<Item = Map<String, Value>>,
{
    trees.into_iter().fold(Map::new(), |mut acc, tree| {
        deep_merge(&mut acc, tree);
        acc
    })
}

/// Walk `segments` down from `root`, returning `None` on the first missing key.
pub fn lookup<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment.as_ref()))
}

/// Flatten nested objects into `parent<delimiter>child` keys. Arrays and
/// scalars are leaves.
pub fn flatten(tree: &Map<String, Value>, delimiter: &str) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(tree, None, delimiter, &mut out);
    out
}

fn flatten_into(
    tree: &Map<String, Value>,
    prefix: Option<&str>,
    delimiter: &str,
    out: &mut Vec<(String, Value)>,
) {
    for (key, value) in tree {
        let full = match prefix {
            Some(p) => format!("{p}{delimiter}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(child) if !child.is_empty() => {
                flatten_into(child, Some(&full), delimiter, out)
            }
            other => out.push((full, other.clone())),
        }
    }
}
