//! Release publishing and downstream propagation for shipit.
//!
//! - [`git`]: release history, shallow clones, commits and pushes
//! - [`github`]: the GitHub [`ReleaseHost`](shipit_core::release::ReleaseHost)
//! - [`notes`]: Markdown release notes
//! - [`propagate`]: Homebrew, Nix and custom downstream updates

pub mod git;
pub mod github;
pub mod notes;
pub mod propagate;

pub use git::{GitError, GitService};
pub use github::{GitHubError, GitHubHost};
pub use notes::release_notes;
pub use propagate::{Downstream, PropagationOutcome, Propagator};
