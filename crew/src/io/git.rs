//! Git adapter for worktree allocation.
//!
//! A small, explicit wrapper around `git` subprocess calls. Failures surface as
//! `Error::External` naming the git subcommand and carrying git's stderr.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Current branch name; `None` on a detached HEAD.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD");
            return Ok(None);
        }
        debug!(branch = %name, "current branch");
        Ok(Some(name))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// `git worktree add -b <branch> <path> <base>`.
    #[instrument(skip_all, fields(branch = %branch, path = %path.display()))]
    pub fn worktree_add(&self, path: &Path, branch: &str, base_ref: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        debug!(base_ref, "adding worktree");
        self.run_checked(&["worktree", "add", "-b", branch, &*path_arg, base_ref])?;
        Ok(())
    }

    /// `git worktree add <path> <branch>` for a branch left behind by an
    /// earlier worktree of the same name.
    #[instrument(skip_all, fields(branch = %branch, path = %path.display()))]
    pub fn worktree_add_existing(&self, path: &Path, branch: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        self.run_checked(&["worktree", "add", &*path_arg, branch])?;
        Ok(())
    }

    /// `git worktree remove [--force] <path>`.
    #[instrument(skip_all, fields(path = %path.display(), force = force))]
    pub fn worktree_remove(&self, path: &Path, force: bool) -> Result<()> {
        let path_arg = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&*path_arg);
        debug!("removing worktree");
        self.run_checked(&args)?;
        Ok(())
    }

    /// `git worktree prune`: forget worktrees whose directory is gone.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::external(
                format!("git {}", args.join(" ")),
                stderr.trim(),
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|err| Error::external(format!("spawn git {}", args.join(" ")), err.to_string()))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(Error::external(
            "git status",
            format!("unexpected porcelain line: '{line}'"),
        ));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
