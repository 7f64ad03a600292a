//! Status engine orchestration.
//!
//! One `Repo` owns everything a status query touches: the backend handle
//! pool, the three category slots, the shard table with its build
//! timestamp, the in-flight task counter, the latched error flag, and the
//! mutex/condvar pair that workers publish through. The querying thread is
//! the sole orchestrator; workers only ever publish filenames, latch the
//! error flag, and decrement the in-flight count.
//!
//! # Query lifecycle
//! 1. Drain stragglers from the previous query (`wait(0)`).
//! 2. Reload the index; build the shard table if absent.
//! 3. Re-check the previous query's filenames with single-file status
//!    lookups; still-valid ones refill their slots without any scan.
//! 4. For each still-unknown category, enqueue one diff task per shard.
//! 5. Sleep on the condvar until every category is answered, the error
//!    flag latches, or all tasks finish.
//! 6. If the shard table is over a minute old, schedule an async rebuild
//!    that waits until it is the only task in flight.
//!
//! # Ordering guarantees
//! - The index is reloaded before any shard task runs.
//! - The shard table is never replaced while a query's tasks are in flight;
//!   the rebuild task waits for `inflight <= 1` (itself).
//! - Once the error flag latches, every later callback aborts before doing
//!   work.
//!
//! Which file fills a slot is nondeterministic across shards; any one file
//! is equally informative.
//!
//! # Cancellation
//! Cooperative only. Reaching "done" does not cancel outstanding tasks;
//! their callbacks observe the filled slots and abort, and the next query's
//! `wait(0)` collects them. Dropping the `Repo` blocks until the in-flight
//! count reaches zero, so worker closures never outlive the state they
//! share.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use git2::{Delta, Oid, Status};
use tracing::{debug, warn};

use crate::engine::errors::StatusError;
use crate::engine::slot::OptionalFile;
use crate::engine::splits::split_index;
use crate::engine::stats::{IndexStats, Tristate};
use crate::engine::tag::{self, TagNameFuture};
use crate::git::backend::{DiffControl, GitBackend, PathRange};
use crate::threads::ThreadPool;

/// Shard tables older than this are rebuilt after the query that noticed.
const SPLIT_REFRESH_PERIOD: Duration = Duration::from_secs(60);

/// Highest in-flight target `Shared::wait` accepts.
const MAX_WAIT_INFLIGHT: usize = 1;

#[derive(Clone, Copy, Debug)]
enum Category {
    Staged,
    Unstaged,
    Untracked,
}

impl Category {
    fn label(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Unstaged => "unstaged",
            Self::Untracked => "untracked",
        }
    }
}

/// State shared between the orchestrator and its worker tasks.
struct Shared {
    staged: OptionalFile,
    unstaged: OptionalFile,
    untracked: OptionalFile,
    /// Scheduled engine tasks that have not finished their cleanup.
    inflight: AtomicUsize,
    /// Latches true when a worker hits a fatal backend error.
    error: AtomicBool,
    guard: Mutex<()>,
    cond: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            staged: OptionalFile::new(),
            unstaged: OptionalFile::new(),
            untracked: OptionalFile::new(),
            inflight: AtomicUsize::new(0),
            error: AtomicBool::new(false),
            guard: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    fn slot(&self, category: Category) -> &OptionalFile {
        match category {
            Category::Staged => &self.staged,
            Category::Unstaged => &self.unstaged,
            Category::Untracked => &self.untracked,
        }
    }

    /// Publishes a discovered filename. The lock-free emptiness probe keeps
    /// the hot path cheap; the write itself happens under the guard and
    /// wakes the orchestrator only when it wins.
    fn update_file(&self, category: Category, path: &[u8]) {
        let slot = self.slot(category);
        if !slot.is_empty() {
            return;
        }
        let _guard = self.guard.lock().unwrap();
        if slot.try_set(path.to_vec()) {
            debug!(
                category = category.label(),
                path = %String::from_utf8_lossy(path),
                "found new file"
            );
            self.cond.notify_one();
        }
    }

    /// Latches the error flag once and wakes every waiter.
    fn set_error(&self) {
        if self.error.load(Ordering::Relaxed) {
            return;
        }
        let _guard = self.guard.lock().unwrap();
        if !self.error.load(Ordering::Relaxed) {
            self.error.store(true, Ordering::Relaxed);
            self.cond.notify_all();
        }
    }

    /// Worker-side completion. Wakes waiters only near quiescence; the
    /// orchestrator and a pending shard-table rebuild may both be waiting.
    fn dec_inflight(&self) {
        let _guard = self.guard.lock().unwrap();
        let previous = self.inflight.fetch_sub(1, Ordering::Relaxed);
        assert!(previous > 0, "inflight underflow");
        if previous <= MAX_WAIT_INFLIGHT + 1 {
            self.cond.notify_all();
        }
    }

    /// Blocks until exactly `target` tasks remain in flight.
    fn wait(&self, target: usize) {
        assert!(target <= MAX_WAIT_INFLIGHT);
        let mut guard = self.guard.lock().unwrap();
        while self.inflight.load(Ordering::Relaxed) != target {
            assert!(self.inflight.load(Ordering::Relaxed) > target);
            guard = self.cond.wait(guard).unwrap();
        }
    }
}

/// Shard boundary table plus the time it was built.
struct SplitTable {
    bounds: Vec<Vec<u8>>,
    built_at: Instant,
}

fn staged_mask() -> Status {
    Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE
}

fn unstaged_mask() -> Status {
    Status::WT_MODIFIED
        | Status::WT_DELETED
        | Status::WT_TYPECHANGE
        | Status::WT_RENAMED
        | Status::CONFLICTED
}

fn untracked_mask() -> Status {
    Status::WT_NEW
}

fn is_done(shared: &Shared, head: Option<Oid>, scan_dirty: bool) -> bool {
    (head.is_none() || !shared.staged.is_empty())
        && (!scan_dirty || (!shared.unstaged.is_empty() && !shared.untracked.is_empty()))
}

/// An opened repository and its scan state.
pub struct Repo {
    backend: Arc<GitBackend>,
    pool: Arc<ThreadPool>,
    shared: Arc<Shared>,
    splits: Arc<Mutex<SplitTable>>,
}

impl Repo {
    /// Opens the repository containing `dir`. Returns `Ok(None)` when the
    /// directory is not inside one.
    pub fn open(dir: &Path, pool: Arc<ThreadPool>) -> Result<Option<Self>, StatusError> {
        let Some(backend) = GitBackend::open_from_env(dir)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            backend: Arc::new(backend),
            pool,
            shared: Arc::new(Shared::new()),
            splits: Arc::new(Mutex::new(SplitTable {
                bounds: Vec::new(),
                built_at: Instant::now(),
            })),
        }))
    }

    #[inline]
    pub fn backend(&self) -> &Arc<GitBackend> {
        &self.backend
    }

    #[inline]
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Schedules a background search for a tag pointing at `target`.
    pub fn tag_name(&self, target: Option<Oid>) -> TagNameFuture {
        tag::tag_name(&self.backend, &self.pool, target)
    }

    /// Computes `{has_staged, has_unstaged, has_untracked}` for the current
    /// working tree.
    ///
    /// `head` is the current HEAD commit, or `None` on an unborn branch.
    /// The working-tree scan is skipped (fields report `Unknown`) when the
    /// index holds more than `dirty_max_index_size` entries.
    pub fn index_stats(
        &mut self,
        head: Option<Oid>,
        dirty_max_index_size: usize,
    ) -> Result<IndexStats, StatusError> {
        self.shared.wait(0);
        let index_size = self.backend.reload_index()?;
        if self.splits.lock().unwrap().bounds.is_empty() {
            refresh_splits(&self.backend, self.pool.num_threads(), &self.splits)?;
        }
        self.shared.error.store(false, Ordering::Relaxed);
        self.update_known();

        let scan_dirty = index_size <= dirty_max_index_size;
        debug!(index_size, scan_dirty, "index loaded");

        if !is_done(&self.shared, head, scan_dirty) {
            assert_eq!(self.shared.inflight.load(Ordering::Relaxed), 0);
            let bounds = self.splits.lock().unwrap().bounds.clone();
            if scan_dirty {
                self.start_dirty_scan(&bounds);
            }
            if let Some(head) = head {
                self.start_staged_scan(head, &bounds)?;
            }

            let mut guard = self.shared.guard.lock().unwrap();
            while self.shared.inflight.load(Ordering::Relaxed) != 0
                && !self.shared.error.load(Ordering::Relaxed)
                && !is_done(&self.shared, head, scan_dirty)
            {
                guard = self.shared.cond.wait(guard).unwrap();
            }
            drop(guard);
        }

        if self.splits.lock().unwrap().built_at.elapsed() >= SPLIT_REFRESH_PERIOD {
            let backend = Arc::clone(&self.backend);
            let splits = Arc::clone(&self.splits);
            let shared = Arc::clone(&self.shared);
            let threads = self.pool.num_threads();
            self.run_async(move || {
                shared.wait(1);
                refresh_splits(&backend, threads, &splits)
            });
        }

        if self.shared.error.load(Ordering::Relaxed) {
            return Err(StatusError::Scan);
        }

        Ok(IndexStats {
            // An empty repository with a non-empty index must have staged
            // changes; there is no base tree for anything to differ from.
            has_staged: !self.shared.staged.is_empty() || (head.is_none() && index_size > 0),
            has_unstaged: Tristate::from_scan(!self.shared.unstaged.is_empty(), scan_dirty),
            has_untracked: Tristate::from_scan(!self.shared.untracked.is_empty(), scan_dirty),
        })
    }

    /// Fast-path recheck: take the previous query's filenames out of their
    /// slots, query each with a single-file status lookup, and refill
    /// whichever slots the reported flags still justify. Runs with no tasks
    /// in flight, so slot access needs no guard.
    fn update_known(&self) {
        struct Hint {
            flags: Status,
            path: Vec<u8>,
        }

        let fetch = |slot: &OptionalFile| match slot.clear() {
            Some(path) => {
                let flags = self.backend.status_file(&path);
                Hint { flags, path }
            }
            None => Hint {
                flags: Status::empty(),
                path: Vec::new(),
            },
        };

        let mut hints = [
            fetch(&self.shared.staged),
            fetch(&self.shared.unstaged),
            fetch(&self.shared.untracked),
        ];

        // First hint matching the mask wins the slot; a hint feeds at most
        // one category.
        let mut snatch = |mask: Status, category: Category| {
            for hint in hints.iter_mut() {
                if hint.flags.intersects(mask) {
                    hint.flags = Status::empty();
                    debug!(
                        category = category.label(),
                        path = %String::from_utf8_lossy(&hint.path),
                        "fast path hit"
                    );
                    let path = std::mem::take(&mut hint.path);
                    assert!(self.shared.slot(category).try_set(path));
                    return;
                }
            }
        };

        snatch(staged_mask(), Category::Staged);
        snatch(unstaged_mask(), Category::Unstaged);
        snatch(untracked_mask(), Category::Untracked);
    }

    /// Enqueues one `index -> workdir` diff task per shard. A single task
    /// can answer both working-tree categories: after publishing one, its
    /// callback keeps scanning the shard until the other is also filled.
    fn start_dirty_scan(&self, bounds: &[Vec<u8>]) {
        if !self.shared.unstaged.is_empty() && !self.shared.untracked.is_empty() {
            return;
        }
        // There is no cheap way to pull one filename out of a directory the
        // backend reports as untracked, so untracked directories are
        // recursed into whenever the slot still needs a path.
        let include_untracked = self.shared.untracked.is_empty();

        for pair in bounds.windows(2) {
            let range = PathRange::new(pair[0].clone(), pair[1].clone());
            let shared = Arc::clone(&self.shared);
            let backend = Arc::clone(&self.backend);
            self.run_async(move || {
                backend.diff_index_to_workdir(&range, include_untracked, &mut |status, path| {
                    if shared.error.load(Ordering::Relaxed) {
                        return DiffControl::Abort;
                    }
                    if status == Delta::Untracked {
                        shared.update_file(Category::Untracked, path);
                        if shared.unstaged.is_empty() {
                            DiffControl::Skip
                        } else {
                            DiffControl::Abort
                        }
                    } else {
                        shared.update_file(Category::Unstaged, path);
                        if shared.untracked.is_empty() {
                            DiffControl::Skip
                        } else {
                            DiffControl::Abort
                        }
                    }
                })
            });
        }
    }

    /// Enqueues one `tree -> index` diff task per shard; the first delta in
    /// any shard answers the category.
    fn start_staged_scan(&self, head: Oid, bounds: &[Vec<u8>]) -> Result<(), StatusError> {
        if !self.shared.staged.is_empty() {
            return Ok(());
        }
        // Fail the query here rather than in every shard task if the
        // commit is unreadable.
        self.backend.verify_commit(head)?;

        for pair in bounds.windows(2) {
            let range = PathRange::new(pair[0].clone(), pair[1].clone());
            let shared = Arc::clone(&self.shared);
            let backend = Arc::clone(&self.backend);
            self.run_async(move || {
                backend.diff_tree_to_index(head, &range, &mut |_status, path| {
                    shared.update_file(Category::Staged, path);
                    DiffControl::Abort
                })
            });
        }
        Ok(())
    }

    /// Runs `task` on the pool with in-flight accounting; failures latch
    /// the shared error flag instead of unwinding.
    fn run_async(&self, task: impl FnOnce() -> Result<(), StatusError> + Send + 'static) {
        let shared = Arc::clone(&self.shared);
        self.shared.inflight.fetch_add(1, Ordering::Relaxed);
        self.pool.schedule(move || {
            if let Err(err) = task() {
                warn!(%err, "scan task failed");
                shared.set_error();
            }
            shared.dec_inflight();
        });
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        // Worker closures share this repo's state; never free it under them.
        self.shared.wait(0);
    }
}

/// Rebuilds the shard table from the current index contents.
fn refresh_splits(
    backend: &GitBackend,
    threads: usize,
    splits: &Mutex<SplitTable>,
) -> Result<(), StatusError> {
    let paths = backend.index_paths()?;
    let bounds = split_index(&paths, threads);
    debug!(
        entries = paths.len(),
        shards = bounds.len() - 1,
        "rebuilt shard table"
    );
    let mut table = splits.lock().unwrap();
    table.bounds = bounds;
    table.built_at = Instant::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_file_first_write_wins() {
        let shared = Shared::new();
        shared.update_file(Category::Unstaged, b"a.c");
        shared.update_file(Category::Unstaged, b"b.c");
        assert_eq!(shared.unstaged.clear(), Some(b"a.c".to_vec()));
        assert!(shared.staged.is_empty());
        assert!(shared.untracked.is_empty());
    }

    #[test]
    fn done_requires_each_launched_category() {
        let shared = Shared::new();
        let head = Some(Oid::zero());

        // Nothing known yet: only the no-head, no-dirty query is done.
        assert!(is_done(&shared, None, false));
        assert!(!is_done(&shared, head, false));
        assert!(!is_done(&shared, None, true));

        shared.update_file(Category::Staged, b"s");
        assert!(is_done(&shared, head, false));
        assert!(!is_done(&shared, head, true));

        shared.update_file(Category::Unstaged, b"u");
        shared.update_file(Category::Untracked, b"n");
        assert!(is_done(&shared, head, true));
    }

    #[test]
    fn wait_returns_at_target() {
        let shared = Arc::new(Shared::new());
        shared.inflight.fetch_add(2, Ordering::Relaxed);
        let publisher = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            publisher.dec_inflight();
            publisher.dec_inflight();
        });
        shared.wait(0);
        assert_eq!(shared.inflight.load(Ordering::Relaxed), 0);
        handle.join().unwrap();
    }
}
