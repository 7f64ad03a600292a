//! Background tag search.
//!
//! Finding a tag that points at HEAD means walking every `refs/tags/*`
//! reference, so it runs on the pool while the status query proceeds; the
//! caller collects the answer at the end through [`TagNameFuture`].

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use git2::{ObjectType, Oid, ReferenceType, Repository};
use tracing::debug;

use crate::engine::errors::StatusError;
use crate::git::backend::GitBackend;
use crate::threads::ThreadPool;

/// Pending result of a tag search.
pub struct TagNameFuture {
    receiver: Receiver<Result<String, StatusError>>,
}

impl TagNameFuture {
    /// Blocks until the search finishes. Empty string means no tag points
    /// at the target.
    pub fn wait(self) -> Result<String, StatusError> {
        self.receiver.recv().unwrap_or(Err(StatusError::Scan))
    }
}

/// Schedules a search for a tag whose target resolves to `target`.
///
/// A `None` target (unborn HEAD) completes immediately with an empty name.
pub fn tag_name(
    backend: &Arc<GitBackend>,
    pool: &ThreadPool,
    target: Option<Oid>,
) -> TagNameFuture {
    let (sender, receiver) = bounded(1);
    match target {
        None => {
            let _ = sender.send(Ok(String::new()));
        }
        Some(target) => {
            let backend = Arc::clone(backend);
            pool.schedule(move || {
                let _ = sender.send(find_tag(&backend, target));
            });
        }
    }
    TagNameFuture { receiver }
}

fn find_tag(backend: &GitBackend, target: Oid) -> Result<String, StatusError> {
    backend.with_repo(|repo| {
        let refs = repo
            .references_glob("refs/tags/*")
            .map_err(|e| StatusError::backend("git_reference_iterator_glob_new", e))?;
        for reference in refs {
            // Broken refs are skipped, not fatal.
            let Ok(reference) = reference else { continue };
            let Some(name) = reference.name() else {
                continue;
            };
            let name = name.to_string();
            if tag_has_target(repo, &name, target) {
                let short = name.strip_prefix("refs/tags/").unwrap_or(&name).to_string();
                debug!(tag = %short, "found tag for target");
                return Ok(short);
            }
        }
        Ok(String::new())
    })
}

/// Whether reference `name` ultimately points at `target`, either directly
/// or through an annotated tag object.
///
/// Symbolic chains are followed for at most 10 hops; deeper chains are
/// treated as not matching.
fn tag_has_target(repo: &Repository, name: &str, target: Oid) -> bool {
    let Ok(mut reference) = repo.find_reference(name) else {
        return false;
    };
    let mut hops = 0;
    while reference.kind() == Some(ReferenceType::Symbolic) {
        if hops == 10 {
            return false;
        }
        hops += 1;
        let Some(next) = reference.symbolic_target().map(str::to_string) else {
            return false;
        };
        match repo.find_reference(&next) {
            Ok(r) => reference = r,
            Err(_) => return false,
        }
    }
    if reference.target() == Some(target) {
        return true;
    }
    let Ok(object) = reference.peel(ObjectType::Tag) else {
        return false;
    };
    object
        .as_tag()
        .is_some_and(|tag| tag.target_id() == target)
}
