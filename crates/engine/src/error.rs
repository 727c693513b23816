use propd_core::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("invalid index document: {0}")]
    InvalidDocument(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
