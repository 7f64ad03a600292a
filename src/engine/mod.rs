//! The parallel, early-exit status engine.
//!
//! # Module map
//! - `slot`: single-write cell holding the first filename found per category.
//! - `splits`: partitions the index into path ranges for parallel diffing.
//! - `stats`: the query result and its three-valued fields.
//! - `repo`: the orchestrator; owns slots, shard table, and worker accounting.
//! - `tag`: background search for a tag pointing at a given object id.
//! - `errors`: engine error types.

pub mod errors;
pub mod repo;
pub mod slot;
pub mod splits;
pub mod stats;
pub mod tag;

pub use errors::StatusError;
pub use repo::Repo;
pub use slot::OptionalFile;
pub use stats::{IndexStats, Tristate};
pub use tag::TagNameFuture;
