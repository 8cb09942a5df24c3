//! GPU-host worker agent.
//!
//! A single continuous process that drains `jobs/pending/` one job at a
//! time: claim by copy-then-delete, stage inputs into the workspace, run
//! the render tool as a subprocess, publish outputs (or a failure record)
//! under `results/<id>/`, then delete the processing manifest. Strictly
//! serial -- at most one job in flight per worker process.

pub mod agent;
pub mod config;
pub mod tool;
pub mod workspace;

pub use agent::WorkerAgent;
pub use config::WorkerConfig;
