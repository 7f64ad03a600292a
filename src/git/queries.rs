//! Reference, stash, and revwalk lookups for the prompt layer.
//!
//! These are the thin operations around the engine. Absent things are
//! absent results, not errors: a missing HEAD, a branch without an
//! upstream, or a misconfigured remote all map to `None`/empty, matching
//! what a prompt wants to render.

use git2::{BranchType, ErrorClass, ErrorCode, Oid, ReferenceType, RepositoryState};
use tracing::debug;

use crate::engine::errors::StatusError;
use crate::git::backend::GitBackend;

/// Resolved HEAD.
#[derive(Clone, Debug)]
pub struct HeadInfo {
    /// Target commit; `None` on an unborn branch (empty repository).
    pub oid: Option<Oid>,
    /// Local branch short name, or empty when detached.
    pub branch: String,
}

/// Upstream of the current branch.
#[derive(Clone, Debug)]
pub struct UpstreamInfo {
    /// Full reference name, usable in revwalk ranges.
    pub refname: String,
    /// Branch name with the remote prefix stripped (`main`, not
    /// `origin/main`).
    pub branch: String,
    /// URL of the tracking remote, or empty when misconfigured.
    pub remote_url: String,
}

/// Stable state tags as consumers see them.
pub fn state_tag(state: RepositoryState) -> &'static str {
    match state {
        RepositoryState::Clean => "",
        RepositoryState::Merge => "merge",
        RepositoryState::Revert => "revert",
        RepositoryState::RevertSequence => "revert-seq",
        RepositoryState::CherryPick => "cherry",
        RepositoryState::CherryPickSequence => "cherry-seq",
        RepositoryState::Bisect => "bisect",
        RepositoryState::Rebase => "rebase",
        RepositoryState::RebaseInteractive => "rebase-i",
        RepositoryState::RebaseMerge => "rebase-m",
        RepositoryState::ApplyMailbox => "am",
        RepositoryState::ApplyMailboxOrRebase => "am/rebase",
    }
}

/// Repository in-progress action, e.g. `"merge"`; empty when none.
pub fn repo_state(backend: &GitBackend) -> Result<&'static str, StatusError> {
    Ok(state_tag(backend.state()?))
}

/// Counts commits in a revision range such as `abc123..HEAD`.
pub fn count_range(backend: &GitBackend, range: &str) -> Result<usize, StatusError> {
    backend.with_repo(|repo| {
        let mut walk = repo
            .revwalk()
            .map_err(|e| StatusError::backend("git_revwalk_new", e))?;
        walk.push_range(range)
            .map_err(|e| StatusError::backend("git_revwalk_push_range", e))?;
        let mut count = 0usize;
        for oid in walk {
            oid.map_err(|e| StatusError::backend("git_revwalk_next", e))?;
            count += 1;
        }
        Ok(count)
    })
}

/// Number of stash entries.
pub fn num_stashes(backend: &GitBackend) -> Result<usize, StatusError> {
    backend.with_repo(|repo| {
        let mut count = 0usize;
        repo.stash_foreach(|_, _, _| {
            count += 1;
            true
        })
        .map_err(|e| StatusError::backend("git_stash_foreach", e))?;
        Ok(count)
    })
}

/// Looks up HEAD. `Ok(None)` when the reference itself is missing; an
/// unborn branch (fresh repository, no commits) yields a `HeadInfo` whose
/// `oid` is `None` but whose branch name is known.
pub fn head(backend: &GitBackend) -> Result<Option<HeadInfo>, StatusError> {
    backend.with_repo(|repo| {
        let symbolic = match repo.find_reference("HEAD") {
            Ok(r) => r,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(StatusError::backend("git_reference_lookup", err)),
        };
        match symbolic.resolve() {
            Ok(direct) => Ok(Some(HeadInfo {
                oid: direct.target(),
                branch: local_branch_name(&direct),
            })),
            Err(_) => {
                debug!("empty repository (unborn HEAD)");
                Ok(Some(HeadInfo {
                    oid: None,
                    branch: local_branch_name(&symbolic),
                }))
            }
        }
    })
}

/// Short local branch name for a HEAD reference, or empty.
///
/// A direct reference names a branch only if it lives under `refs/heads/`;
/// a symbolic reference (unborn branch) carries the target name instead.
fn local_branch_name(reference: &git2::Reference<'_>) -> String {
    match reference.kind() {
        Some(ReferenceType::Direct) => {
            if reference.is_branch() {
                reference.shorthand().unwrap_or("").to_string()
            } else {
                String::new()
            }
        }
        Some(ReferenceType::Symbolic) => reference
            .symbolic_target()
            .and_then(|t| t.strip_prefix("refs/heads/"))
            .unwrap_or("")
            .to_string(),
        None => String::new(),
    }
}

/// Looks up the upstream of local branch `branch`. `Ok(None)` when no
/// upstream is configured or the configuration is invalid.
pub fn upstream(backend: &GitBackend, branch: &str) -> Result<Option<UpstreamInfo>, StatusError> {
    backend.with_repo(|repo| {
        let local = match repo.find_branch(branch, BranchType::Local) {
            Ok(b) => b,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(StatusError::backend("git_branch_lookup", err)),
        };
        let up = match local.upstream() {
            Ok(b) => b,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) if err.class() == ErrorClass::Invalid => return Ok(None),
            Err(err) => return Err(StatusError::backend("git_branch_upstream", err)),
        };

        let refname = up.get().name().unwrap_or("").to_string();
        Ok(Some(UpstreamInfo {
            branch: remote_branch_name(repo, &up),
            remote_url: remote_url(repo, &refname)?,
            refname,
        }))
    })
}

/// Branch name with its remote prefix stripped, or empty.
fn remote_branch_name(repo: &git2::Repository, branch: &git2::Branch<'_>) -> String {
    let Ok(Some(name)) = branch.name() else {
        return String::new();
    };
    let Some(refname) = branch.get().name() else {
        return String::new();
    };
    let Ok(remote) = repo.branch_remote_name(refname) else {
        return String::new();
    };
    let Some(remote) = remote.as_str() else {
        return String::new();
    };
    name.strip_prefix(remote)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or("")
        .to_string()
}

/// URL of the remote tracking `refname`. Absent or misconfigured remotes
/// read as empty; any other lookup failure fails the query.
fn remote_url(repo: &git2::Repository, refname: &str) -> Result<String, StatusError> {
    let Ok(remote_name) = repo.branch_remote_name(refname) else {
        return Ok(String::new());
    };
    let Some(remote_name) = remote_name.as_str() else {
        return Ok(String::new());
    };
    match repo.find_remote(remote_name) {
        Ok(remote) => Ok(remote.url().unwrap_or("").to_string()),
        Err(err)
            if err.code() == ErrorCode::NotFound || err.code() == ErrorCode::InvalidSpec =>
        {
            Ok(String::new())
        }
        Err(err) => Err(StatusError::backend("git_remote_lookup", err)),
    }
}
