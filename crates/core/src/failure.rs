//! Failure records published to `results/<id>/_FAILED`.
//!
//! A failed job still produces a results prefix; the `_FAILED` marker
//! carries a machine-readable cause code and a one-line message so the
//! operator can decide whether to re-submit.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Worker-recognized failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// A script or asset referenced by the manifest is not on the store.
    MissingInput,
    /// The tool exited with a non-zero status.
    ToolError,
    /// The tool ran past the execution timeout and was killed.
    Timeout,
    /// An orchestrator invariant was violated while handling the job.
    Internal,
}

impl FailureCause {
    /// Wire representation used in the `_FAILED` body.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingInput => "missing_input",
            Self::ToolError => "tool_error",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

/// Body of the `_FAILED` marker object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub cause: FailureCause,
    pub message: String,
}

impl FailureRecord {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize failure record: {e}")))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::Validation(format!("Malformed failure record: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_codes_are_stable() {
        assert_eq!(FailureCause::MissingInput.as_str(), "missing_input");
        assert_eq!(FailureCause::ToolError.as_str(), "tool_error");
        assert_eq!(FailureCause::Timeout.as_str(), "timeout");
        assert_eq!(FailureCause::Internal.as_str(), "internal");
    }

    #[test]
    fn record_round_trips() {
        let record = FailureRecord::new(FailureCause::ToolError, "Tool exited with code 1");
        let bytes = record.to_bytes().unwrap();
        assert_eq!(FailureRecord::parse(&bytes).unwrap(), record);
    }

    #[test]
    fn cause_serializes_as_snake_case() {
        let json = serde_json::to_value(FailureCause::MissingInput).unwrap();
        assert_eq!(json, serde_json::json!("missing_input"));
    }
}
