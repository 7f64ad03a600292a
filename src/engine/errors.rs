//! Engine error types.
//!
//! Failure policy: a directory that is not a repository is an absent result,
//! not an error (`Repo::open` returns `Ok(None)`). A backend call that fails
//! for external reasons fails the current query and names the call that
//! failed. A fatal condition observed by a worker mid-scan latches the
//! shared error flag and surfaces as `Scan` once the query drains. Broken
//! internal invariants (inflight underflow, unsorted shard tables) are bugs
//! and assert instead of returning an error.

use std::error::Error;
use std::fmt;

/// Error returned by status queries and the thin repository operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum StatusError {
    /// A backend call failed. `op` names the call for diagnostics.
    Backend {
        op: &'static str,
        source: git2::Error,
    },
    /// A worker observed a fatal condition during a scan; the query was
    /// drained and abandoned.
    Scan,
}

impl StatusError {
    /// Wraps a failed backend call.
    #[inline]
    pub fn backend(op: &'static str, source: git2::Error) -> Self {
        Self::Backend { op, source }
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { op, source } => write!(f, "{op}: {}", source.message()),
            Self::Scan => write!(f, "scan failed"),
        }
    }
}

impl Error for StatusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend { source, .. } => Some(source),
            Self::Scan => None,
        }
    }
}
