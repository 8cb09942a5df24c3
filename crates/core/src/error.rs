use crate::failure::FailureCause;

/// Shared error taxonomy for the orchestrator.
///
/// - `Validation` -- caller supplied bad input; surfaced immediately, no
///   state was mutated.
/// - `NotFound` -- the requested entity does not exist (unknown id on
///   download, missing object).
/// - `Transport` -- a store or network operation failed after the store
///   wrapper exhausted its retries.
/// - `Execution` -- the render tool exited non-zero, timed out, or crashed.
///   Recorded in the job's `_FAILED` marker; never retried automatically.
/// - `Internal` -- an invariant was violated. Details are logged, never
///   shown to clients.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Store operation failed: {0}")]
    Transport(String),

    #[error("Job execution failed ({}): {message}", .cause.as_str())]
    Execution { cause: FailureCause, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}
