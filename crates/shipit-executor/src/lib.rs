//! Job execution backends for shipit.
//!
//! Provides:
//! - A local process executor for validation checks and matrix builds
//! - A filesystem artifact store shared by matrix cells and the aggregator

pub mod artifacts;
pub mod local;

pub use artifacts::{LocalArtifactStore, sha256_hex};
pub use local::LocalExecutor;
pub use shipit_core::executor::{
    Executor, JobHandle, JobResult, JobSpec, JobStatus, LogLine, LogStream,
};
