//! Maps raw instance-metadata paths to properties.

use std::collections::HashMap;

use serde_json::{Map, Value};
#[cfg(test)]
use serde_json::json;

/// Raw metadata: path (relative to `/latest/`) to response body.
pub type RawMetadata = HashMap<String, String>;

pub const CREDENTIALS_PREFIX: &str = "meta-data/iam/security-credentials/";
pub const MACS_PREFIX: &str = "meta-data/network/interfaces/macs/";
pub const IDENTITY_DOCUMENT: &str = "dynamic/instance-identity/document";
pub const IDENTITY_PKCS7: &str = "dynamic/instance-identity/pkcs7";
pub const MAC: &str = "meta-data/mac";

/// Leaf paths whose value is published under the path's last segment.
pub const BASENAME_PATHS: &[&str] = &[
    "meta-data/ami-id",
    "meta-data/placement/availability-zone",
    "meta-data/hostname",
    "meta-data/instance-id",
    "meta-data/instance-type",
    "meta-data/local-ipv4",
    "meta-data/local-hostname",
    "meta-data/public-hostname",
    "meta-data/public-ipv4",
    "meta-data/reservation-id",
    "meta-data/security-groups",
];

const INTERFACE_FIELDS: &[&str] = &[
    "vpc-ipv4-cidr-block",
    "subnet-ipv4-cidr-block",
    "public-ipv4s",
    "mac",
    "local-ipv4s",
    "interface-id",
];

/// Paths the walker starts from; entries ending in `/` are directories.
pub fn roots() -> Vec<&'static str> {
    let mut roots = BASENAME_PATHS.to_vec();
    roots.extend([IDENTITY_DOCUMENT, IDENTITY_PKCS7, CREDENTIALS_PREFIX, MAC, MACS_PREFIX]);
    roots
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn parse(raw: &RawMetadata) -> Map<String, Value> {
    let mut properties = Map::new();

    for path in BASENAME_PATHS {
        if let Some(value) = raw.get(*path) {
            properties.insert(basename(path).to_string(), Value::String(value.clone()));
        }
    }

    let mut identity = Map::new();
    identity_document(raw, &mut identity, &mut properties);
    if let Some(pkcs7) = raw.get(IDENTITY_PKCS7).filter(|s| !s.is_empty()) {
        identity.insert("pkcs7".into(), Value::String(pkcs7.clone()));
    }
    if !identity.is_empty() {
        properties.insert("identity".into(), Value::Object(identity));
    }
    security_credentials(raw, &mut properties);
    interfaces(raw, &mut properties);

    properties
}

fn identity_document(
    raw: &RawMetadata,
    identity: &mut Map<String, Value>,
    properties: &mut Map<String, Value>,
) {
    let Some(document) = raw.get(IDENTITY_DOCUMENT).filter(|s| !s.is_empty()) else {
        return;
    };
    identity.insert("document".into(), Value::String(document.clone()));

    match serde_json::from_str::<Value>(document) {
        Ok(identity) => {
            properties.insert("account".into(), identity.get("accountId").cloned().unwrap_or(Value::Null));
            properties.insert("region".into(), identity.get("region").cloned().unwrap_or(Value::Null));
        }
        Err(e) => tracing::warn!(error = %e, "instance identity document is not valid JSON"),
    }
}

fn security_credentials(raw: &RawMetadata, properties: &mut Map<String, Value>) {
    // An instance has at most one role.
    let mut roles: Vec<(&String, &String)> = raw
        .iter()
        .filter(|(path, _)| path.starts_with(CREDENTIALS_PREFIX) && path.len() > CREDENTIALS_PREFIX.len())
        .collect();
    roles.sort();
    let Some((path, document)) = roles.first() else {
        return;
    };

    let role = path.trim_start_matches(CREDENTIALS_PREFIX);
    properties.insert("iam-role".into(), Value::String(role.to_string()));

    let credentials: Value = match serde_json::from_str(document) {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::warn!(role, error = %e, "security credentials are not valid JSON");
            return;
        }
    };
    let field = |name: &str| credentials.get(name).cloned().unwrap_or(Value::Null);
    let mut target = Map::new();
    for (key, source) in [
        ("lastUpdated", "LastUpdated"),
        ("type", "Type"),
        ("accessKeyId", "AccessKeyId"),
        ("secretAccessKey", "SecretAccessKey"),
        ("expires", "Expiration"),
    ] {
        target.insert(key.into(), field(source));
    }
    properties.insert("credentials".into(), Value::Object(target));
}

fn interfaces(raw: &RawMetadata, properties: &mut Map<String, Value>) {
    let Some(mac) = raw.get(MAC).map(|m| m.trim()).filter(|m| !m.is_empty()) else {
        return;
    };
    let lookup = |field: &str| {
        raw.get(&format!("{MACS_PREFIX}{mac}/{field}"))
            .map(|v| Value::String(v.clone()))
            .unwrap_or(Value::Null)
    };

    let interface: Map<String, Value> = INTERFACE_FIELDS
        .iter()
        .map(|field| (field.to_string(), lookup(field)))
        .collect();
    properties.insert("interface".into(), Value::Object(interface));
    properties.insert("vpc-id".into(), lookup("vpc-id"));
}

/// Region from an availability zone (`us-east-1a` -> `us-east-1`).
pub fn region_from_zone(zone: &str) -> Option<&str> {
    let trimmed = zone.trim();
    if trimmed.len() < 2 {
        return None;
    }
    Some(&trimmed[..trimmed.len() - 1])
}

/// Fixture of a typical instance, shared with the adapter tests.
#[cfg(test)]
pub(crate) fn sample() -> RawMetadata {
    let mac = "0e:49:61:0f:c3:11";
    let identity = json!({
        "accountId": "123456789012",
        "region": "us-east-1",
        "instanceId": "i-0abc",
        "availabilityZone": "us-east-1a"
    });
    let credentials = json!({
        "Code": "Success",
        "LastUpdated": "2016-09-06T14:26:57Z",
        "Type": "AWS-HMAC",
        "AccessKeyId": "ASIAEXAMPLE",
        "SecretAccessKey": "secret",
        "Token": "token",
        "Expiration": "2016-09-06T20:46:47Z"
    });

    let mut raw = RawMetadata::new();
    let mut put = |path: String, value: String| {
        raw.insert(path, value);
    };
    put("meta-data/ami-id".into(), "ami-2051294a".into());
    put("meta-data/placement/availability-zone".into(), "us-east-1a".into());
    put("meta-data/hostname".into(), "ip-10-0-0-1.ec2.internal".into());
    put("meta-data/instance-id".into(), "i-0abc".into());
    put("meta-data/instance-type".into(), "t2.micro".into());
    put("meta-data/local-ipv4".into(), "10.0.0.1".into());
    put(MAC.into(), mac.into());
    put(IDENTITY_DOCUMENT.into(), identity.to_string());
    put(IDENTITY_PKCS7.into(), "MIAGCSqGSIb3DQEHAqCAMIACAQExCzAJ".into());
    put(format!("{CREDENTIALS_PREFIX}fake-role"), credentials.to_string());
    for (field, value) in [
        ("vpc-id", "vpc-1"),
        ("vpc-ipv4-cidr-block", "10.0.0.0/16"),
        ("subnet-ipv4-cidr-block", "10.0.0.0/24"),
        ("public-ipv4s", "54.0.0.1"),
        ("mac", mac),
        ("local-ipv4s", "10.0.0.1"),
        ("interface-id", "eni-1"),
    ] {
        put(format!("{MACS_PREFIX}{mac}/{field}"), value.into());
    }
    raw
}
