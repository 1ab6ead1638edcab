//! Core domain types and traits for the shipit release pipeline.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy
//! - Executor trait and job types
//! - Pipeline, stage and trigger definitions
//! - The build matrix table
//! - Commit classification and version resolution
//! - Release and downstream propagation types
//! - Artifact storage abstraction

pub mod artifact;
pub mod commit;
pub mod downstream;
pub mod error;
pub mod executor;
pub mod id;
pub mod pipeline;
pub mod platform;
pub mod release;
pub mod version;

pub use error::{Error, Result};
pub use id::ResourceId;
