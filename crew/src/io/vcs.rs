//! Version-control backend seam used by the worktree registry.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::io::git::{Git, StatusEntry};

/// Branch and pending changes of one worktree directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeInspection {
    /// `None` on a detached HEAD.
    pub branch: Option<String>,
    pub entries: Vec<StatusEntry>,
}

impl WorktreeInspection {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Creates and destroys working-directory-plus-branch pairs.
pub trait VcsBackend: Send + Sync {
    fn create_worktree(&self, path: &Path, branch: &str, base_ref: &str) -> Result<()>;
    /// Succeeds without doing anything destructive when `path` is already gone.
    fn remove_worktree(&self, path: &Path, force: bool) -> Result<()>;
    fn inspect(&self, path: &Path) -> Result<WorktreeInspection>;
}

/// `git worktree` on the repository at `repo_root`.
#[derive(Debug, Clone)]
pub struct GitBackend {
    repo: Git,
}

impl GitBackend {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo: Git::new(repo_root),
        }
    }
}

impl VcsBackend for GitBackend {
    fn create_worktree(&self, path: &Path, branch: &str, base_ref: &str) -> Result<()> {
        // Removing a worktree leaves its branch behind; a reused name picks it up.
        if self.repo.branch_exists(branch)? {
            debug!(branch, "reusing existing branch");
            return self.repo.worktree_add_existing(path, branch);
        }
        self.repo.worktree_add(path, branch, base_ref)
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        if !path.exists() {
            debug!(path = %path.display(), "directory already gone, pruning");
            return self.repo.worktree_prune();
        }
        self.repo.worktree_remove(path, force)
    }

    fn inspect(&self, path: &Path) -> Result<WorktreeInspection> {
        let git = Git::new(path);
        Ok(WorktreeInspection {
            branch: git.current_branch()?,
            entries: git.status_porcelain()?,
        })
    }
}
