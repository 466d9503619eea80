//! Shared identifier and timestamp aliases.

use serde::{Deserialize, Serialize};

/// Unique identifier for a pipeline job.
pub type JobId = uuid::Uuid;

/// Unique identifier for a task lease.
pub type LeaseId = uuid::Uuid;

/// Owning project reference supplied at submission time.
pub type ProjectId = uuid::Uuid;

/// Identifier a worker process mints for itself at startup.
pub type WorkerId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque reference to a stored artifact (object-store path, content
/// hash, upload id). The orchestrator never interprets the contents —
/// artifact refs flow from one stage executor to the next unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
