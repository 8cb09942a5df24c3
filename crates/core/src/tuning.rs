//! Shared timing defaults.
//!
//! All of these are overridable through the environment (see each binary's
//! config module); the constants here are only the compiled-in bottom of
//! the precedence chain.

/// How often the worker polls `jobs/pending/` and `Wait` re-probes status.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Upper bound on a `Wait` call.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 3600;

/// Execution timeout for the render tool. Also the staleness threshold
/// after which a `processing/` manifest is considered abandoned.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 3600;

/// Worker-local job records and logs older than this are pruned.
pub const LOCAL_RECORD_RETENTION_SECS: u64 = 24 * 60 * 60;
