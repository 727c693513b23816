use serde::Deserialize;
use serde_json::{json, Map, Value};

/// One entry of `/v1/health/service/<name>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthEntry {
    #[serde(default)]
    pub node: Address,
    #[serde(default)]
    pub service: Address,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    #[serde(default)]
    pub address: String,
}

impl HealthEntry {
    /// Service address, falling back to the node's.
    pub fn address(&self) -> Option<&str> {
        [&self.service.address, &self.node.address]
            .into_iter()
            .map(String::as_str)
            .find(|a| !a.is_empty())
    }
}

/// `{consul: {<service>: {cluster, addresses}}}`.
pub fn parse(services: Vec<(String, Vec<HealthEntry>)>) -> Map<String, Value> {
    let consul: Map<String, Value> = services
        .into_iter()
        .map(|(service, entries)| {
            let addresses: Vec<&str> = entries.iter().filter_map(HealthEntry::address).collect();
            let node = json!({"cluster": service, "addresses": addresses});
            (service, node)
        })
        .collect();

    let mut properties = Map::new();
    properties.insert("consul".into(), Value::Object(consul));
    properties
}
