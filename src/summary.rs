//! One-shot prompt summary.
//!
//! Composes the engine and the thin queries into the answer a shell prompt
//! renders: branch or detached head, upstream and its ahead/behind counts,
//! stash count, in-progress action, nearest tag, and the three dirty flags.

use git2::Oid;
use tracing::debug;

use crate::engine::errors::StatusError;
use crate::engine::repo::Repo;
use crate::engine::stats::IndexStats;
use crate::git::queries::{self, UpstreamInfo};

/// Everything a prompt wants to know about one repository.
#[derive(Debug)]
pub struct Summary {
    /// Local branch short name; empty when detached or HEAD is missing.
    pub branch: String,
    /// HEAD commit, or `None` on an unborn branch.
    pub head_oid: Option<Oid>,
    pub upstream: Option<UpstreamInfo>,
    /// Commits on HEAD that the upstream lacks. Zero without an upstream.
    pub ahead: usize,
    /// Commits on the upstream that HEAD lacks. Zero without an upstream.
    pub behind: usize,
    pub stashes: usize,
    /// In-progress action tag, e.g. `"merge"`; empty when none.
    pub state: &'static str,
    /// Tag pointing at HEAD, or empty.
    pub tag: String,
    pub stats: IndexStats,
}

/// Runs every query against an opened repository.
///
/// The tag search is scheduled first so it overlaps the status scan, and
/// collected last.
pub fn summarize(repo: &mut Repo, dirty_max_index_size: usize) -> Result<Summary, StatusError> {
    let backend = std::sync::Arc::clone(repo.backend());

    let head = queries::head(&backend)?;
    let (head_oid, branch) = match head {
        Some(h) => (h.oid, h.branch),
        None => (None, String::new()),
    };

    let tag = repo.tag_name(head_oid);
    let stats = repo.index_stats(head_oid, dirty_max_index_size)?;

    let upstream = if branch.is_empty() {
        None
    } else {
        queries::upstream(&backend, &branch)?
    };
    let (ahead, behind) = match &upstream {
        Some(up) if !up.refname.is_empty() => (
            queries::count_range(&backend, &format!("{}..HEAD", up.refname))?,
            queries::count_range(&backend, &format!("HEAD..{}", up.refname))?,
        ),
        _ => (0, 0),
    };

    let stashes = queries::num_stashes(&backend)?;
    let state = queries::repo_state(&backend)?;
    let tag = tag.wait()?;

    debug!(branch = %branch, ahead, behind, stashes, "summary complete");
    Ok(Summary {
        branch,
        head_oid,
        upstream,
        ahead,
        behind,
        stashes,
        state,
        tag,
        stats,
    })
}
