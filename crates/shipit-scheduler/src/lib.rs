//! Pipeline orchestration for shipit.
//!
//! Runs the stage graph selected for a trigger event: validation, the parallel
//! build matrix, artifact aggregation, version resolution, publishing and
//! downstream propagation.

pub mod graph;
mod matrix;
pub mod orchestrator;
mod release;


pub use orchestrator::{
    PipelineEvent, PipelineOrchestrator, PipelineResult, RepoSnapshot, RunSettings, StageState,
};
