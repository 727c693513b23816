//! Self-referential placeholder resolution over the merged tree.
//!
//! A placeholder is `{{ ns:path|filter }}`: a colon-separated path into the
//! tree, optionally piped through minijinja filters. Each placeholder is
//! rewritten into a subscript expression (`tree['ns']['path']|filter`) and
//! evaluated against the tree itself. A placeholder that cannot be resolved
//! is left in place verbatim.

use std::sync::OnceLock;

use minijinja::{context, Environment, UndefinedBehavior};
use propd_core::tree::NAMESPACE_DELIMITER;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::Result;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{ ?(.+?) ?\}\}").expect("placeholder pattern is valid"))
}

/// Rewrite `ns:path|filters` into `tree['ns']['path']|filters`.
pub fn to_expression(reference: &str) -> String {
    let (path, filters) = match reference.split_once('|') {
        Some((path, filters)) => (path, Some(filters)),
        None => (reference, None),
    };

    let mut expr = String::from("tree");
    for segment in path.split(NAMESPACE_DELIMITER).map(str::trim) {
        expr.push_str("['");
        expr.push_str(&segment.replace('\\', "\\\\").replace('\'', "\\'"));
        expr.push_str("']");
    }
    if let Some(filters) = filters {
        expr.push('|');
        expr.push_str(filters.trim());
    }
    expr
}

pub struct Interpolator {
    env: Environment<'static>,
}

impl Interpolator {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        Self { env }
    }

    /// Evaluate one placeholder body against `tree`.
    pub fn evaluate(&self, reference: &str, tree: &minijinja::Value) -> Result<String> {
        let source = to_expression(reference);
        let expression = self.env.compile_expression(&source)?;
        let value = expression.eval(context! { tree => tree })?;
        if value.is_undefined() || value.is_none() {
            return Err(minijinja::Error::new(
                minijinja::ErrorKind::UndefinedError,
                format!("`{reference}` resolved to nothing"),
            )
            .into());
        }
        Ok(value.to_string())
    }

    /// Replace every resolvable placeholder in `text`.
    pub fn render_str(&self, text: &str, tree: &minijinja::Value) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        placeholder()
            .replace_all(text, |caps: &Captures<'_>| match self.evaluate(&caps[1], tree) {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::debug!(placeholder = &caps[0], error = %e, "unresolved placeholder");
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Resolve placeholders in every key and string value of `tree`, using
    /// `tree` itself as the lookup context.
    pub fn resolve_tree(&self, tree: Map<String, Value>) -> Map<String, Value> {
        let context = minijinja::Value::from_serialize(&tree);
        self.resolve_map(tree, &context)
    }

    /// Resolve placeholders in `value` against an external `context` tree.
    pub fn resolve_value(&self, value: Value, context: &Map<String, Value>) -> Value {
        let context = minijinja::Value::from_serialize(context);
        self.resolve(value, &context)
    }

    fn resolve_map(&self, map: Map<String, Value>, context: &minijinja::Value) -> Map<String, Value> {
        map.into_iter()
            .map(|(key, value)| (self.render_str(&key, context), self.resolve(value, context)))
            .collect()
    }

    fn resolve(&self, value: Value, context: &minijinja::Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.render_str(&s, context)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.resolve(v, context)).collect())
            }
            Value::Object(map) => Value::Object(self.resolve_map(map, context)),
            other => other,
        }
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn expression_rewrite() {
        assert_eq!(to_expression("net:ip"), "tree['net']['ip']");
        assert_eq!(to_expression("instance:tags:Name|upper"), "tree['instance']['tags']['Name']|upper");
        assert_eq!(to_expression("flat"), "tree['flat']");
        assert_eq!(to_expression("it's"), "tree['it\\'s']");
    }

    #[test]
    fn resolves_against_own_tree() {
        let tree = obj(json!({
            "net": {"ip": "10.0.0.1"},
            "endpoint": "{{ net:ip }}:8080"
        }));
        let resolved = Interpolator::new().resolve_tree(tree);
        assert_eq!(
            Value::Object(resolved),
            json!({"net": {"ip": "10.0.0.1"}, "endpoint": "10.0.0.1:8080"})
        );
    }

    #[test]
    fn filters_apply() {
        let tree = obj(json!({"env": {"name": "prod"}, "upper": "{{ env:name|upper }}"}));
        let resolved = Interpolator::new().resolve_tree(tree);
        assert_eq!(resolved["upper"], json!("PROD"));
    }

    #[test]
    fn non_string_values_render_as_text() {
        let tree = obj(json!({"svc": {"port": 8080, "tls": true}, "url": "h:{{svc:port}}/{{ svc:tls }}"}));
        let resolved = Interpolator::new().resolve_tree(tree);
        assert_eq!(resolved["url"], json!("h:8080/true"));
    }

    #[test]
    fn unresolved_placeholders_stay_literal() {
        let tree = obj(json!({
            "net": {"ip": "10.0.0.1"},
            "missing": "{{ net:gateway }}",
            "mixed": "{{ net:ip }}/{{ nope:x }}",
            "broken": "{{ net:ip|no_such_filter }}"
        }));
        let resolved = Interpolator::new().resolve_tree(tree);
        assert_eq!(resolved["missing"], json!("{{ net:gateway }}"));
        assert_eq!(resolved["mixed"], json!("10.0.0.1/{{ nope:x }}"));
        assert_eq!(resolved["broken"], json!("{{ net:ip|no_such_filter }}"));
    }

    #[test]
    fn keys_and_arrays_are_resolved() {
        let tree = obj(json!({
            "region": {"name": "us-west-2"},
            "{{ region:name }}": {"zones": ["{{ region:name }}a", 3]}
        }));
        let resolved = Interpolator::new().resolve_tree(tree);
        assert_eq!(resolved["us-west-2"], json!({"zones": ["us-west-2a", 3]}));
    }

    #[test]
    fn resolve_value_uses_external_context() {
        let context = obj(json!({"instance": {"vpc-id": "vpc-1"}}));
        let value = json!({"path": "{{ instance:vpc-id }}/props.json"});
        assert_eq!(
            Interpolator::new().resolve_value(value, &context),
            json!({"path": "vpc-1/props.json"})
        );
    }
}
