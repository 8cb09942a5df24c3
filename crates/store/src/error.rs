use posegrid_core::error::CoreError;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key '{0}': keys must match [A-Za-z0-9/_.-]+")]
    InvalidKey(String),

    #[error("Store client binary not found: {0}")]
    BinaryMissing(std::io::Error),

    #[error("Store command failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse store listing: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a retry could plausibly succeed. Not-found, bad keys, and
    /// unparsable listings are deterministic; transport-shaped failures
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommandFailed { .. } | Self::Io(_))
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => CoreError::NotFound {
                entity: "Object",
                id: key,
            },
            StoreError::InvalidKey(key) => {
                CoreError::Validation(format!("Invalid object key '{key}'"))
            }
            other => CoreError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(StoreError::CommandFailed {
            exit_code: Some(1),
            stderr: "connection reset".into()
        }
        .is_retryable());
        assert!(!StoreError::NotFound("jobs/pending/x.json".into()).is_retryable());
        assert!(!StoreError::InvalidKey("a b".into()).is_retryable());
        assert!(!StoreError::ParseError("bad json".into()).is_retryable());
    }

    #[test]
    fn not_found_maps_to_core_not_found() {
        let core: CoreError = StoreError::NotFound("results/x".into()).into();
        assert!(matches!(core, CoreError::NotFound { .. }));
    }

    #[test]
    fn command_failure_maps_to_transport() {
        let core: CoreError = StoreError::CommandFailed {
            exit_code: Some(1),
            stderr: "boom".into(),
        }
        .into();
        assert!(matches!(core, CoreError::Transport(_)));
    }
}
