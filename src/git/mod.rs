//! Thin facade over the version-control backend.
//!
//! The engine consumes a narrow capability surface: open a repository from
//! a directory, reload and snapshot the index, run range-restricted diffs
//! that feed a per-delta callback, query a single file's status, and a
//! handful of reference/stash/revwalk lookups for the surrounding prompt
//! code. Everything backend-specific stays behind this module; the engine
//! never touches libgit2 options directly.

pub mod backend;
pub mod queries;

pub use backend::{DiffControl, GitBackend, PathRange};
pub use queries::{HeadInfo, UpstreamInfo};
