//! Derived job status.
//!
//! Status is never stored in a manifest; it is a pure function of which
//! prefixes currently hold objects for the id. Probes must run in a fixed
//! order -- results, then processing, then pending -- so that a job observed
//! in both queue prefixes mid-move resolves to `processing`, and a job
//! whose results landed before its processing manifest was deleted resolves
//! to `completed`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Consumed, deleted, or never submitted to this store.
    Unknown,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
