//! Working-tree status engine for shell prompts.
//!
//! Answers one question as fast as possible: does this repository have
//! staged changes, unstaged changes, untracked files? The engine shards the
//! index into path ranges, runs staged and dirty diffs concurrently on a
//! fixed worker pool, and stops as soon as one filename per category has
//! been found. Filenames discovered by one query are re-checked with a
//! single-file status lookup at the start of the next, which usually
//! answers without scanning at all.
//!
//! High-level flow (one query):
//! 1) Reload the index; rebuild the shard table if absent.
//! 2) Re-validate the previously discovered filenames (fast path).
//! 3) For each still-unknown category, enqueue one diff task per shard.
//! 4) Workers publish the first matching filename into per-category slots.
//! 5) Wake when every category is answered or all tasks drained.
//!
//! Everything around the engine is thin: reference and upstream lookups,
//! commit counting over a range, stash counting, repository state tags, and
//! a background tag search, composed into a one-shot prompt summary by
//! [`summary`].

pub mod engine;
pub mod git;
pub mod summary;
pub mod threads;

pub use engine::errors::StatusError;
pub use engine::repo::Repo;
pub use engine::stats::{IndexStats, Tristate};
pub use threads::ThreadPool;
