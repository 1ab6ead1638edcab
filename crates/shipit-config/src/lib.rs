//! KDL configuration parsing for shipit.
//!
//! This crate handles parsing of:
//! - The project definition (shipit.kdl)
//! - Variable interpolation for downstream templates

pub mod error;
pub mod project;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use project::{Check, Committer, ProjectConfig, load_project, parse_project};
pub use variables::{GitContext, ReleaseContext, VariableContext, VariableContextBuilder};
