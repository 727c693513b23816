use thiserror::Error;

#[derive(Error, Debug)]
pub enum PropdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure raised by a source adapter during construction or a poll cycle.
///
/// Poll-cycle errors never escape the lifecycle runner; they become the
/// source's `ERROR` status and an `ERROR` event.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("AWS request failed: {0}")]
    Aws(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required parameter `{0}`")]
    MissingOption(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("unable to parse backend response: {0}")]
    Parse(String),

    #[error("unknown source type: {0}")]
    UnknownType(String),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    pub fn aws(err: impl std::fmt::Display) -> Self {
        Self::Aws(err.to_string())
    }
}

pub type Result<T, E = PropdError> = std::result::Result<T, E>;
