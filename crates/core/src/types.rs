use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a source's most recent poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Ok,
    /// Fetch succeeded, content unchanged.
    NoUpdate,
    /// The backend object does not exist (yet).
    NoExist,
    /// Partial or degraded data.
    Warning,
    Error,
}

impl SourceStatus {
    /// Whether this status alone marks the source as unhealthy.
    pub fn is_failure(self) -> bool {
        matches!(self, SourceStatus::Error | SourceStatus::Warning)
    }

    /// Ranking used to surface the worst status across many sources.
    pub fn severity(self) -> u8 {
        match self {
            SourceStatus::Ok => 0,
            SourceStatus::NoUpdate => 1,
            SourceStatus::NoExist => 2,
            SourceStatus::Warning => 3,
            SourceStatus::Error => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Ok => "OK",
            SourceStatus::NoUpdate => "NO_UPDATE",
            SourceStatus::NoExist => "NO_EXIST",
            SourceStatus::Warning => "WARNING",
            SourceStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source lifecycle state.
///
/// `Created -> Initializing -> Waiting <-> Running`, with `Shutdown`
/// reachable from anywhere and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceState {
    Created,
    Initializing,
    Waiting,
    Running,
    Shutdown,
}

impl SourceState {
    /// Only waiting or running sources contribute to the merged tree.
    pub fn is_available(self) -> bool {
        matches!(self, SourceState::Waiting | SourceState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceState::Created => "CREATED",
            SourceState::Initializing => "INITIALIZING",
            SourceState::Waiting => "WAITING",
            SourceState::Running => "RUNNING",
            SourceState::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one source, as reported by health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub ok: bool,
    pub state: SourceState,
    pub status: SourceStatus,
    pub updated_at: Option<DateTime<Utc>>,
}
