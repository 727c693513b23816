use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PropdError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read `PROPD_{SECTION}_{KEY}`.
fn section_env(section: &str, key: &str) -> Option<String> {
    env_opt(&format!("PROPD_{}_{}", section, key))
}

fn parse_env<T: std::str::FromStr>(section: &str, key: &str) -> Result<Option<T>> {
    match section_env(section, key) {
        Some(raw) => raw.parse().map(Some).map_err(|_| PropdError::InvalidConfig {
            key: format!("{}.{}", section.to_lowercase(), key.to_lowercase()),
            value: raw,
        }),
        None => Ok(None),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub index: IndexConfig,
    pub metadata: MetadataConfig,
    pub tags: TagsConfig,
    pub consul: ConsulConfig,
    pub log: LogConfig,
    /// Static property overlay merged on top of every source.
    pub properties: Map<String, Value>,
}

impl Config {
    /// Build config from defaults, an optional TOML file, then environment
    /// overrides (call `load_dotenv()` first).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string. Environment overrides are not applied.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("index.interval", &self.index.interval),
            ("metadata.interval", &self.metadata.interval),
            ("metadata.timeout", &self.metadata.timeout),
            ("tags.interval", &self.tags.interval),
        ] {
            if parse_interval(value).is_none() {
                return Err(PropdError::InvalidConfig {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `PROPD_SECTION_KEY` overrides `section.key`, e.g.
    /// `PROPD_INDEX_BUCKET` -> `index.bucket`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = section_env("SERVICE", "HOST") {
            self.service.host = v;
        }
        if let Some(v) = parse_env("SERVICE", "PORT")? {
            self.service.port = v;
        }
        if let Some(v) = section_env("INDEX", "BUCKET") {
            self.index.bucket = Some(v);
        }
        if let Some(v) = section_env("INDEX", "PATH") {
            self.index.path = v;
        }
        if let Some(v) = section_env("INDEX", "INTERVAL") {
            self.index.interval = v;
        }
        if let Some(v) = section_env("INDEX", "REGION") {
            self.index.region = v;
        }
        if let Some(v) = section_env("INDEX", "ENDPOINT") {
            self.index.endpoint = Some(v);
        }
        if let Some(v) = section_env("METADATA", "HOST") {
            self.metadata.host = v;
        }
        if let Some(v) = section_env("METADATA", "INTERVAL") {
            self.metadata.interval = v;
        }
        if let Some(v) = section_env("METADATA", "TIMEOUT") {
            self.metadata.timeout = v;
        }
        if let Some(v) = section_env("TAGS", "INTERVAL") {
            self.tags.interval = v;
        }
        if let Some(v) = section_env("CONSUL", "HOST") {
            self.consul.host = v;
        }
        if let Some(v) = parse_env("CONSUL", "PORT")? {
            self.consul.port = v;
        }
        if let Some(v) = section_env("CONSUL", "SCHEME") {
            self.consul.scheme = v;
        }
        if let Some(v) = section_env("LOG", "LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = parse_env("LOG", "JSON")? {
            self.log.json = v;
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  service:   {}:{}", self.service.host, self.service.port);
        tracing::info!(
            "  index:     bucket={}, path={}, interval={}",
            self.index.bucket.as_deref().unwrap_or("(none)"),
            self.index.path,
            self.index.interval
        );
        tracing::info!("  metadata:  host={}, interval={}", self.metadata.host, self.metadata.interval);
        tracing::info!("  tags:      interval={}", self.tags.interval);
        tracing::info!("  consul:    {}", self.consul.base_url());
        tracing::info!("  overlay:   {} static properties", self.properties.len());
    }
}

// ── Service ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9100,
        }
    }
}

// ── Remote index ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub bucket: Option<String>,
    pub path: String,
    pub interval: String,
    pub region: String,
    /// Custom S3-compatible endpoint (path-style, plain HTTP allowed).
    pub endpoint: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            path: "index.json".to_string(),
            interval: "30s".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

impl IndexConfig {
    pub fn is_configured(&self) -> bool {
        self.bucket.is_some()
    }

    pub fn interval(&self) -> Duration {
        parse_interval(&self.interval).unwrap_or(DEFAULT_INTERVAL)
    }
}

// ── Instance metadata / tags ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub host: String,
    pub interval: String,
    pub timeout: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            host: "169.254.169.254".to_string(),
            interval: "30s".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

impl MetadataConfig {
    pub fn interval(&self) -> Duration {
        parse_interval(&self.interval).unwrap_or(DEFAULT_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        parse_interval(&self.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}/latest", self.host.trim_end_matches('/'))
        } else {
            format!("http://{}/latest", self.host)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
    pub interval: String,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
        }
    }
}

impl TagsConfig {
    pub fn interval(&self) -> Duration {
        parse_interval(&self.interval).unwrap_or(DEFAULT_INTERVAL)
    }
}

// ── Consul ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8500,
            scheme: "http".to_string(),
        }
    }
}

impl ConsulConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

// ── Interval parsing ──────────────────────────────────────────

/// Poll interval used when a source is scheduled without one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Longest interval accepted; timer deadlines stay far from `Instant` overflow.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 86_400);

/// Parse a human-readable duration string into a [`Duration`].
///
/// Supports components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds).
/// Components can be combined: "2h30m", "1d12h", "90s". A bare number is seconds.
/// Returns `None` if the string is empty, unparseable, zero, or longer than
/// [`MAX_INTERVAL`].
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        if found_unit {
            // "30m15" is ambiguous
            return None;
        }
        total_secs = total_secs.checked_add(num_buf.parse::<u64>().ok()?)?;
    }

    let interval = Duration::from_secs(total_secs);
    if total_secs == 0 || interval > MAX_INTERVAL {
        return None;
    }
    Some(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.service.port, 9100);
        assert_eq!(config.index.path, "index.json");
        assert_eq!(config.index.interval(), Duration::from_secs(30));
        assert_eq!(config.metadata.base_url(), "http://169.254.169.254/latest");
        assert_eq!(config.consul.base_url(), "http://127.0.0.1:8500");
        assert!(!config.index.is_configured());
        assert!(config.properties.is_empty());
    }

    #[test]
    fn parse_interval_variants() {
        assert_eq!(parse_interval("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_interval("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_interval("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_interval("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("0s"), None);
        assert_eq!(parse_interval("10x"), None);
        assert_eq!(parse_interval("30m15"), None);
    }

    #[test]
    fn parse_interval_rejects_oversized_values() {
        assert_eq!(parse_interval("999999999999999999d"), None);
        assert_eq!(parse_interval("18446744073709551615s1s"), None);
        assert_eq!(parse_interval("99999999999999999999"), None);
        assert_eq!(parse_interval("367d"), None);
        assert_eq!(parse_interval("366d"), Some(MAX_INTERVAL));
        assert_eq!(parse_interval("1d12h"), Some(Duration::from_secs(129_600)));
    }

    #[test]
    fn toml_with_overlay() {
        let config = Config::from_toml(
            r#"
            [index]
            bucket = "props"
            interval = "1m"

            [properties]
            endpoint = "{{ net:ip }}:8080"

            [properties.nested]
            flag = true
            "#,
        )
        .unwrap();
        assert_eq!(config.index.bucket.as_deref(), Some("props"));
        assert_eq!(config.index.interval(), Duration::from_secs(60));
        assert_eq!(config.index.region, "us-east-1");
        assert_eq!(config.properties["endpoint"], "{{ net:ip }}:8080");
        assert_eq!(config.properties["nested"]["flag"], true);
    }

    #[test]
    fn invalid_interval_rejected() {
        let err = Config::from_toml("[tags]\ninterval = \"soon\"\n").unwrap_err();
        assert!(matches!(err, PropdError::InvalidConfig { .. }));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[service]\nport = 9200").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.service.port, 9200);
        assert_eq!(config.service.host, "127.0.0.1");
    }
}
