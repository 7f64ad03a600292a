#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

/// Create a temp repo with an initial commit and return (TempDir, repo_path).
///
/// The repo starts with a single committed `README.md`. The default branch
/// name is whatever git's init defaults produce; read it back with
/// [`head_branch`] instead of assuming.
pub fn init_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let repo = Repository::init(&repo_path).expect("failed to init repo");
    create_file(&repo_path, "README.md", "# scratch\n");

    let mut index = repo.index().expect("failed to get index");
    index
        .add_path(Path::new("README.md"))
        .expect("failed to add to index");
    index.write().expect("failed to write index");

    let tree_id = index.write_tree().expect("failed to write tree");
    let tree = repo.find_tree(tree_id).expect("failed to find tree");
    let sig = signature();
    repo.commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])
        .expect("failed to create initial commit");

    (dir, repo_path)
}

/// Create a bare temp dir that is not a repository.
pub fn init_plain_dir() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().to_path_buf();
    (dir, path)
}

pub fn signature() -> Signature<'static> {
    Signature::now("Test User", "test@example.com").expect("failed to create signature")
}

/// Write `content` to `name` under the working tree, creating parents.
pub fn create_file(repo_path: &Path, name: &str, content: &str) {
    let file_path = repo_path.join(name);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dirs");
    }
    fs::write(&file_path, content).expect("failed to write file");
}

/// Stage everything and commit; returns the new commit id.
pub fn commit_all(repo_path: &Path, message: &str) -> Oid {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let mut index = repo.index().expect("failed to get index");
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .expect("failed to add all");
    index.write().expect("failed to write index");

    let tree_id = index.write_tree().expect("failed to write tree");
    let tree = repo.find_tree(tree_id).expect("failed to find tree");
    let sig = signature();
    let head = repo.head().expect("failed to get head");
    let parent = head.peel_to_commit().expect("failed to peel to commit");
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .expect("failed to commit")
}

/// Commit whatever is already staged, without touching the index.
pub fn commit_index(repo_path: &Path, message: &str) -> Oid {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let mut index = repo.index().expect("failed to get index");
    let tree_id = index.write_tree().expect("failed to write tree");
    let tree = repo.find_tree(tree_id).expect("failed to find tree");
    let sig = signature();
    let head = repo.head().expect("failed to get head");
    let parent = head.peel_to_commit().expect("failed to peel to commit");
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .expect("failed to commit")
}

/// Remove one path from both the index and the working tree.
pub fn remove_path(repo_path: &Path, path: &str) {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let mut index = repo.index().expect("failed to get index");
    index
        .remove_path(Path::new(path))
        .expect("failed to remove from index");
    index.write().expect("failed to write index");
    fs::remove_file(repo_path.join(path)).expect("failed to remove file");
}

/// Stage one path.
pub fn stage_path(repo_path: &Path, path: &str) {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let mut index = repo.index().expect("failed to get index");
    index
        .add_path(Path::new(path))
        .expect("failed to add to index");
    index.write().expect("failed to write index");
}

/// Current HEAD commit id.
pub fn head_oid(repo_path: &Path) -> Oid {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let head = repo.head().expect("failed to get head");
    head.target().expect("head is not direct")
}

/// Short name of the branch HEAD points at.
pub fn head_branch(repo_path: &Path) -> String {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let head = repo.head().expect("failed to get head");
    head.shorthand()
        .expect("head has no shorthand")
        .to_string()
}

/// Commit `files_per_dir` files in each of `dirs` directories in one go.
pub fn commit_tree_of(repo_path: &Path, dirs: usize, files_per_dir: usize) -> Oid {
    for d in 0..dirs {
        for f in 0..files_per_dir {
            create_file(
                repo_path,
                &format!("dir{d:04}/file{f:03}.c"),
                &format!("content {d}/{f}\n"),
            );
        }
    }
    commit_all(repo_path, "bulk tree")
}
