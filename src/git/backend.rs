//! libgit2-backed capability provider.
//!
//! # Handle pool
//! `git2::Repository` is `Send` but not `Sync`, so a single handle cannot be
//! shared across diff tasks. The backend owns the discovery directory and a
//! checkout pool of opened handles: a task checks one out (opening a new one
//! on a dry pool), uses it, and returns it. Handles all point at the same
//! on-disk state; each checkout that needs the index refreshes its view
//! first, which is a timestamp check when nothing changed.
//!
//! # Ranges and early abort
//! Upstream libgit2 exposes no path-range diff, so each capability applies
//! the shard range itself, in two different ways:
//!
//! - The staged diff does not go through `git_diff` at all. It walks the
//!   index slice inside `(start, end]` against the head tree, then walks
//!   the head tree with subtrees outside the range pruned before they are
//!   loaded. Work is proportional to the shard, and `Abort` stops the walk
//!   immediately.
//! - The workdir diff has no such luxury: libgit2 materializes its deltas
//!   before we see any of them. The range is narrowed to the bounds'
//!   common directory prefix via a pathspec when one exists (which also
//!   bounds the workdir walk) and enforced exactly by post-filtering, so
//!   each delta still lands in exactly one shard task. For a shard that
//!   spans several top-level directories the backend stats the full
//!   workdir and `Abort` only stops delta iteration, not generation; a
//!   backend with native range support would replace only this adapter.
//!
//! The callback's verdict maps onto the walks the same way in both cases:
//! `Continue` and `Skip` keep going (`Skip` exists for callers that want to
//! stop collecting one category but keep scanning for another), while
//! `Abort` ends the task's diff.
//!
//! # Submodules
//! The workdir diff suppresses submodule deltas wholesale (the one knob
//! this binding exposes), which alone would hide a submodule whose checked
//! out commit moved. The gitlink entries in range are therefore re-checked
//! directly at the "dirty" ignore level: a moved commit pointer counts as
//! a change, dirt inside the submodule's own working tree does not, and
//! nothing recurses into the submodule.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::{
    Delta, DiffOptions, ErrorCode, Index, IndexEntry, ObjectType, Oid, Repository,
    RepositoryOpenFlags, RepositoryState, Status, SubmoduleIgnore, Tree,
};
use memchr::memrchr;
use tracing::{debug, error};

use crate::engine::errors::StatusError;

/// Verdict returned by a per-delta diff callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffControl {
    /// Keep going.
    Continue,
    /// Stop collecting this delta's category but keep scanning the shard.
    Skip,
    /// Unwind the whole diff for this shard.
    Abort,
}

/// Half-open path interval `(start, end]` assigned to one diff task.
///
/// Empty strings are sentinels: an empty `start` means "from the beginning",
/// an empty `end` means "to the end".
#[derive(Clone, Debug)]
pub struct PathRange {
    start: Vec<u8>,
    end: Vec<u8>,
}

impl PathRange {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self { start, end }
    }

    /// Whether `path` falls inside this range.
    #[inline]
    pub fn contains(&self, path: &[u8]) -> bool {
        (self.start.is_empty() || path > self.start.as_slice())
            && (self.end.is_empty() || path <= self.end.as_slice())
    }

    /// Longest directory shared by both bounds, without its trailing slash.
    ///
    /// Any path between two bounds that agree on a directory prefix must
    /// itself live under that directory, so the result is safe to hand to
    /// the backend as a coarse restriction. `contains` stays authoritative.
    pub fn common_dir_prefix(&self) -> Option<&[u8]> {
        if self.start.is_empty() || self.end.is_empty() {
            return None;
        }
        let shared = self
            .start
            .iter()
            .zip(self.end.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let cut = memrchr(b'/', &self.start[..shared])?;
        if cut == 0 {
            return None;
        }
        Some(&self.start[..cut])
    }
}

/// Owning handle to an opened repository.
pub struct GitBackend {
    dir: PathBuf,
    handles: Mutex<Vec<Repository>>,
}

impl GitBackend {
    /// Opens the repository containing `dir`, honoring `$GIT_DIR` and
    /// friends. Returns `Ok(None)` when `dir` is not inside a repository.
    pub fn open_from_env(dir: &Path) -> Result<Option<Self>, StatusError> {
        match Repository::open_ext(
            dir,
            RepositoryOpenFlags::FROM_ENV,
            std::iter::empty::<&OsStr>(),
        ) {
            Ok(repo) => Ok(Some(Self {
                dir: dir.to_path_buf(),
                handles: Mutex::new(vec![repo]),
            })),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => {
                error!(dir = %dir.display(), %err, "repository open failed");
                Err(StatusError::backend("git_repository_open_ext", err))
            }
        }
    }

    fn checkout(&self) -> Result<Repository, StatusError> {
        if let Some(repo) = self.handles.lock().unwrap().pop() {
            return Ok(repo);
        }
        debug!(dir = %self.dir.display(), "opening extra repository handle");
        Repository::open_ext(
            &self.dir,
            RepositoryOpenFlags::FROM_ENV,
            std::iter::empty::<&OsStr>(),
        )
        .map_err(|err| StatusError::backend("git_repository_open_ext", err))
    }

    fn checkin(&self, repo: Repository) {
        self.handles.lock().unwrap().push(repo);
    }

    /// Runs `f` with a checked-out repository handle.
    ///
    /// The handle is returned to the pool afterwards, including on error.
    pub fn with_repo<T>(
        &self,
        f: impl FnOnce(&mut Repository) -> Result<T, StatusError>,
    ) -> Result<T, StatusError> {
        let mut repo = self.checkout()?;
        let out = f(&mut repo);
        self.checkin(repo);
        out
    }

    /// Reloads the index from disk and returns its entry count.
    pub fn reload_index(&self) -> Result<usize, StatusError> {
        self.with_repo(|repo| {
            let mut index = repo
                .index()
                .map_err(|e| StatusError::backend("git_repository_index", e))?;
            index
                .read(false)
                .map_err(|e| StatusError::backend("git_index_read", e))?;
            Ok(index.len())
        })
    }

    /// Snapshots every index entry path, in index order.
    pub fn index_paths(&self) -> Result<Vec<Vec<u8>>, StatusError> {
        self.with_repo(|repo| {
            let mut index = repo
                .index()
                .map_err(|e| StatusError::backend("git_repository_index", e))?;
            index
                .read(false)
                .map_err(|e| StatusError::backend("git_index_read", e))?;
            Ok(index.iter().map(|entry| entry.path).collect())
        })
    }

    /// Single-file status lookup. Any failure reads as "no flags": the
    /// fast path treats that as a stale hint and falls back to scanning.
    pub fn status_file(&self, path: &[u8]) -> Status {
        let Ok(text) = std::str::from_utf8(path) else {
            return Status::empty();
        };
        self.with_repo(|repo| Ok(repo.status_file(Path::new(text)).unwrap_or(Status::empty())))
            .unwrap_or(Status::empty())
    }

    /// Checks that `head` resolves to a commit with a tree.
    pub fn verify_commit(&self, head: Oid) -> Result<(), StatusError> {
        self.with_repo(|repo| {
            repo.find_commit(head)
                .and_then(|commit| commit.tree())
                .map(|_| ())
                .map_err(|e| StatusError::backend("git_commit_lookup", e))
        })
    }

    /// Diffs `tree_of(head) -> index` over one shard, feeding each in-range
    /// change to `cb` until it aborts or the shard is exhausted.
    ///
    /// Implemented as a direct walk rather than a backend diff so the shard
    /// range actually bounds the work: the index slice is found by binary
    /// search and the head tree is walked with out-of-range subtrees pruned
    /// before they are loaded.
    pub fn diff_tree_to_index(
        &self,
        head: Oid,
        range: &PathRange,
        cb: &mut dyn FnMut(Delta, &[u8]) -> DiffControl,
    ) -> Result<(), StatusError> {
        self.with_repo(|repo| {
            let tree = repo
                .find_commit(head)
                .and_then(|commit| commit.tree())
                .map_err(|e| StatusError::backend("git_commit_tree", e))?;
            let mut index = repo
                .index()
                .map_err(|e| StatusError::backend("git_repository_index", e))?;
            index
                .read(false)
                .map_err(|e| StatusError::backend("git_index_read", e))?;

            if staged_index_side(&tree, &index, range, cb)? {
                return Ok(());
            }
            let mut prefix = Vec::new();
            staged_tree_side(repo, &tree, &mut prefix, &index, range, cb)?;
            Ok(())
        })
    }

    /// Diffs `index -> workdir` over one shard. Untracked files are included
    /// (and untracked directories recursed into) only when the caller still
    /// needs one; submodules are handled per the module docs.
    pub fn diff_index_to_workdir(
        &self,
        range: &PathRange,
        include_untracked: bool,
        cb: &mut dyn FnMut(Delta, &[u8]) -> DiffControl,
    ) -> Result<(), StatusError> {
        self.with_repo(|repo| {
            let mut index = repo
                .index()
                .map_err(|e| StatusError::backend("git_repository_index", e))?;
            index
                .read(false)
                .map_err(|e| StatusError::backend("git_index_read", e))?;
            let mut opts = DiffOptions::new();
            opts.skip_binary_check(true).ignore_submodules(true);
            if include_untracked {
                opts.include_untracked(true).recurse_untracked_dirs(true);
            }
            if let Some(dir) = range.common_dir_prefix() {
                opts.pathspec(dir.to_vec()).disable_pathspec_match(true);
            }
            let diff = repo
                .diff_index_to_workdir(Some(&index), Some(&mut opts))
                .map_err(|e| StatusError::backend("git_diff_index_to_workdir", e))?;
            if drive(&diff, range, cb) {
                return Ok(());
            }
            submodule_commit_check(repo, &index, range, cb);
            Ok(())
        })
    }

    /// Current repository state (merge, rebase, ...).
    pub fn state(&self) -> Result<RepositoryState, StatusError> {
        self.with_repo(|repo| Ok(repo.state()))
    }
}

/// Stage bits of a git index entry's flags word.
const INDEX_ENTRY_STAGE_MASK: u16 = 0x3000;
const INDEX_ENTRY_STAGE_SHIFT: u16 = 12;

/// Gitlink filemode recorded for submodule entries.
const GITLINK_MODE: u32 = 0o160000;

#[inline]
fn entry_stage(entry: &IndexEntry) -> u16 {
    (entry.flags & INDEX_ENTRY_STAGE_MASK) >> INDEX_ENTRY_STAGE_SHIFT
}

#[inline]
fn bytes_path(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

/// First index position whose path sorts after `start`.
fn first_beyond(index: &Index, start: &[u8]) -> usize {
    if start.is_empty() {
        return 0;
    }
    let mut lo = 0usize;
    let mut hi = index.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match index.get(mid) {
            Some(entry) if entry.path.as_slice() <= start => lo = mid + 1,
            _ => hi = mid,
        }
    }
    lo
}

fn index_has_path(index: &Index, path: &[u8]) -> bool {
    let path = bytes_path(path);
    (0..=3).any(|stage| index.get_path(path, stage).is_some())
}

/// Index side of the staged walk: entries in range that the head tree lacks
/// or records differently. Returns whether the callback aborted.
fn staged_index_side(
    tree: &Tree<'_>,
    index: &Index,
    range: &PathRange,
    cb: &mut dyn FnMut(Delta, &[u8]) -> DiffControl,
) -> Result<bool, StatusError> {
    let mut pos = first_beyond(index, &range.start);
    while pos < index.len() {
        let Some(entry) = index.get(pos) else { break };
        pos += 1;
        if !range.end.is_empty() && entry.path.as_slice() > range.end.as_slice() {
            break;
        }
        let change = if entry_stage(&entry) != 0 {
            Some(Delta::Conflicted)
        } else {
            match tree.get_path(bytes_path(&entry.path)) {
                Ok(in_tree) => {
                    if in_tree.id() != entry.id || in_tree.filemode() as u32 != entry.mode {
                        Some(Delta::Modified)
                    } else {
                        None
                    }
                }
                Err(err) if err.code() == ErrorCode::NotFound => Some(Delta::Added),
                Err(err) => return Err(StatusError::backend("git_tree_entry_bypath", err)),
            }
        };
        if let Some(change) = change {
            match cb(change, &entry.path) {
                DiffControl::Continue | DiffControl::Skip => {}
                DiffControl::Abort => return Ok(true),
            }
        }
    }
    Ok(false)
}

/// Tree side of the staged walk: head-tree paths in range that the index no
/// longer has read as deletions. Subtrees that cannot intersect the range
/// are pruned without being loaded. Returns whether the callback aborted.
fn staged_tree_side(
    repo: &Repository,
    tree: &Tree<'_>,
    prefix: &mut Vec<u8>,
    index: &Index,
    range: &PathRange,
    cb: &mut dyn FnMut(Delta, &[u8]) -> DiffControl,
) -> Result<bool, StatusError> {
    for entry in tree.iter() {
        let base = prefix.len();
        if !prefix.is_empty() {
            prefix.push(b'/');
        }
        prefix.extend_from_slice(entry.name_bytes());

        let aborted = if entry.kind() == Some(ObjectType::Tree) {
            prefix.push(b'/');
            let descend = subtree_intersects(prefix, range);
            prefix.pop();
            if descend {
                let subtree = repo
                    .find_tree(entry.id())
                    .map_err(|e| StatusError::backend("git_tree_lookup", e))?;
                staged_tree_side(repo, &subtree, prefix, index, range, cb)?
            } else {
                false
            }
        } else if range.contains(prefix) && !index_has_path(index, prefix) {
            matches!(cb(Delta::Deleted, prefix), DiffControl::Abort)
        } else {
            false
        };

        prefix.truncate(base);
        if aborted {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether any path under a directory (given with its trailing slash) can
/// fall inside the range. Every child shares the directory prefix, so both
/// bounds prune whole subtrees by byte comparison alone.
fn subtree_intersects(dir_slash: &[u8], range: &PathRange) -> bool {
    if !range.end.is_empty() && dir_slash > range.end.as_slice() {
        return false;
    }
    if !range.start.is_empty()
        && range.start.as_slice() > dir_slash
        && !range.start.starts_with(dir_slash)
    {
        return false;
    }
    true
}

/// Re-derives submodule changes the workdir diff suppressed: a gitlink in
/// range whose submodule HEAD no longer matches the recorded commit counts
/// as a change at the "dirty" ignore level, with no recursion into the
/// submodule's own working tree.
fn submodule_commit_check(
    repo: &Repository,
    index: &Index,
    range: &PathRange,
    cb: &mut dyn FnMut(Delta, &[u8]) -> DiffControl,
) {
    let mut pos = first_beyond(index, &range.start);
    while pos < index.len() {
        let Some(entry) = index.get(pos) else { break };
        pos += 1;
        if !range.end.is_empty() && entry.path.as_slice() > range.end.as_slice() {
            break;
        }
        if entry.mode != GITLINK_MODE {
            continue;
        }
        let Ok(name) = std::str::from_utf8(&entry.path) else {
            continue;
        };
        // Orphaned gitlinks with no submodule configuration are skipped.
        let Ok(status) = repo.submodule_status(name, SubmoduleIgnore::Dirty) else {
            continue;
        };
        let change = if status.is_wd_modified() {
            Some(Delta::Modified)
        } else if status.is_wd_deleted() {
            Some(Delta::Deleted)
        } else {
            None
        };
        if let Some(change) = change {
            match cb(change, &entry.path) {
                DiffControl::Continue | DiffControl::Skip => {}
                DiffControl::Abort => return,
            }
        }
    }
}

/// Feeds in-range deltas to the callback. Returns whether it aborted.
fn drive(
    diff: &git2::Diff<'_>,
    range: &PathRange,
    cb: &mut dyn FnMut(Delta, &[u8]) -> DiffControl,
) -> bool {
    for delta in diff.deltas() {
        let path = delta
            .new_file()
            .path_bytes()
            .or_else(|| delta.old_file().path_bytes())
            .unwrap_or(b"");
        if !range.contains(path) {
            continue;
        }
        match cb(delta.status(), path) {
            DiffControl::Continue | DiffControl::Skip => {}
            DiffControl::Abort => return true,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_membership() {
        let whole = PathRange::new(Vec::new(), Vec::new());
        assert!(whole.contains(b"anything"));

        let first = PathRange::new(Vec::new(), b"m".to_vec());
        let rest = PathRange::new(b"m".to_vec(), Vec::new());
        assert!(first.contains(b"a/x"));
        assert!(first.contains(b"m"));
        assert!(!first.contains(b"m/x"));
        assert!(rest.contains(b"m/x"));
        assert!(rest.contains(b"z"));
        assert!(!rest.contains(b"m"));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let bounds: [&[u8]; 4] = [b"", b"a/b", b"c", b""];
        let ranges: Vec<PathRange> = bounds
            .windows(2)
            .map(|w| PathRange::new(w[0].to_vec(), w[1].to_vec()))
            .collect();
        for path in [
            b"a/a".as_slice(),
            b"a/b",
            b"a/b/x",
            b"b",
            b"c",
            b"c/deep/file",
            b"zz",
        ] {
            let hits = ranges.iter().filter(|r| r.contains(path)).count();
            assert_eq!(hits, 1, "path {:?}", String::from_utf8_lossy(path));
        }
    }

    #[test]
    fn common_prefix_needs_both_bounds() {
        let open_start = PathRange::new(Vec::new(), b"a/b".to_vec());
        let open_end = PathRange::new(b"a/b".to_vec(), Vec::new());
        assert_eq!(open_start.common_dir_prefix(), None);
        assert_eq!(open_end.common_dir_prefix(), None);
    }

    #[test]
    fn common_prefix_stops_at_directory_boundary() {
        let cross = PathRange::new(b"a/b".to_vec(), b"c".to_vec());
        assert_eq!(cross.common_dir_prefix(), None);

        let shared = PathRange::new(b"src/lib/a".to_vec(), b"src/lib/z".to_vec());
        assert_eq!(shared.common_dir_prefix(), Some(b"src/lib".as_slice()));

        // The shared bytes run past the last full component; only whole
        // directories are usable as a restriction.
        let partial = PathRange::new(b"src/liba".to_vec(), b"src/libz".to_vec());
        assert_eq!(partial.common_dir_prefix(), Some(b"src".as_slice()));
    }

    #[test]
    fn subtree_pruning_respects_bounds() {
        let range = PathRange::new(b"a/m".to_vec(), b"c".to_vec());
        assert!(subtree_intersects(b"a/", &range)); // tail of `a` is in range
        assert!(!subtree_intersects(b"a/b/", &range)); // wholly before start
        assert!(subtree_intersects(b"a/m/", &range)); // start splits it
        assert!(subtree_intersects(b"b/", &range));
        assert!(!subtree_intersects(b"c/", &range)); // past the end bound
        assert!(!subtree_intersects(b"d/", &range));
    }
}
