//! Test-only helpers: task graph fixtures, a fake version-control backend,
//! a scratch crew workspace and scripted stand-ins for the agent loop seams.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tempfile::TempDir;

use crate::autonomy::Sleeper;
use crate::core::decision::Decision;
use crate::core::task::Task;
use crate::error::{Error, Result as CrewResult};
use crate::io::config::CrewConfig;
use crate::io::decision::{DecisionMaker, DecisionRequest};
use crate::io::init::{InitOptions, init_crew};
use crate::io::vcs::{VcsBackend, WorktreeInspection};
use crate::workspace::Workspace;

/// Build a task map from `(id, blocked_by)` pairs with reciprocal `blocks`
/// edges filled in.
pub fn task_set(edges: &[(u64, &[u64])]) -> BTreeMap<u64, Task> {
    let now = Utc::now();
    let mut tasks: BTreeMap<u64, Task> = edges
        .iter()
        .map(|(id, _)| (*id, Task::new(*id, &format!("task {id}"), "", now)))
        .collect();
    for (id, blockers) in edges {
        for blocker in *blockers {
            if let Some(task) = tasks.get_mut(id) {
                task.blocked_by.insert(*blocker);
            }
            if let Some(task) = tasks.get_mut(blocker) {
                task.blocks.insert(*id);
            }
        }
    }
    tasks
}

/// In-memory VCS: creates and deletes plain directories, remembers branches.
#[derive(Debug, Default)]
pub struct FakeVcs {
    branches: Mutex<HashSet<String>>,
    worktrees: Mutex<BTreeMap<PathBuf, String>>,
    fail_removals: AtomicBool,
}

impl FakeVcs {
    /// Make every subsequent removal fail like a dirty `git worktree remove`.
    pub fn fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    pub fn branches(&self) -> Vec<String> {
        let mut branches: Vec<String> = self
            .branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        branches.sort();
        branches
    }
}

impl VcsBackend for FakeVcs {
    fn create_worktree(&self, path: &Path, branch: &str, _base_ref: &str) -> CrewResult<()> {
        let mut worktrees = self.worktrees.lock().unwrap_or_else(PoisonError::into_inner);
        if worktrees.contains_key(path) {
            return Err(Error::external(
                "git worktree add",
                format!("'{}' already exists", path.display()),
            ));
        }
        fs::create_dir_all(path).map_err(|err| Error::storage("create worktree", path, err))?;
        worktrees.insert(path.to_path_buf(), branch.to_string());
        self.branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(branch.to_string());
        Ok(())
    }

    fn remove_worktree(&self, path: &Path, _force: bool) -> CrewResult<()> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(Error::external(
                "git worktree remove",
                "contains modified or untracked files",
            ));
        }
        let mut worktrees = self.worktrees.lock().unwrap_or_else(PoisonError::into_inner);
        if !path.exists() {
            worktrees.remove(path);
            return Ok(());
        }
        if worktrees.remove(path).is_none() {
            return Err(Error::external(
                "git worktree remove",
                format!("'{}' is not a working tree", path.display()),
            ));
        }
        if path.exists() {
            fs::remove_dir_all(path).map_err(|err| Error::storage("remove worktree", path, err))?;
        }
        Ok(())
    }

    fn inspect(&self, path: &Path) -> CrewResult<WorktreeInspection> {
        let worktrees = self.worktrees.lock().unwrap_or_else(PoisonError::into_inner);
        let branch = worktrees.get(path).cloned().ok_or_else(|| {
            Error::external("git status", format!("'{}' is not a working tree", path.display()))
        })?;
        Ok(WorktreeInspection {
            branch: Some(branch),
            entries: Vec::new(),
        })
    }
}

/// Initialized `.crew/` in a temp dir, backed by [`FakeVcs`] and fast locks.
pub struct TestCrew {
    _temp: TempDir,
    pub ws: Workspace,
    pub vcs: Arc<FakeVcs>,
}

impl TestCrew {
    pub fn new() -> Self {
        Self::with_config(CrewConfig::default())
    }

    pub fn with_config(mut config: CrewConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_crew(temp.path(), &InitOptions::default()).expect("init crew");
        config.lock.retry_attempts = config.lock.retry_attempts.max(200);
        config.lock.retry_delay_ms = 1;
        let vcs = Arc::new(FakeVcs::default());
        let ws = Workspace::with_vcs(paths, config, vcs.clone());
        Self {
            _temp: temp,
            ws,
            vcs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.ws.paths.root
    }
}

impl Default for TestCrew {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns queued decisions in order, then `Stop` forever.
#[derive(Debug, Default)]
pub struct ScriptedDecisionMaker {
    queue: Mutex<VecDeque<Decision>>,
    seen_turns: Mutex<Vec<usize>>,
}

impl ScriptedDecisionMaker {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            queue: Mutex::new(decisions.into()),
            seen_turns: Mutex::new(Vec::new()),
        }
    }

    /// Transcript length observed by each `decide` call.
    pub fn seen_turns(&self) -> Vec<usize> {
        self.seen_turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DecisionMaker for ScriptedDecisionMaker {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision> {
        self.seen_turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.conversation.len());
        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(next.unwrap_or(Decision::Stop {
            summary: String::new(),
        }))
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Sleeper that returns immediately, records durations and can run a hook
/// on a given (1-based) call to simulate activity between polls.
#[derive(Default)]
pub struct RecordingSleeper {
    durations: Mutex<Vec<Duration>>,
    hooks: Mutex<Vec<(usize, Hook)>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_call(&self, call: usize, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((call, Box::new(hook)));
    }

    pub fn calls(&self) -> usize {
        self.durations().len()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        let call = {
            let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
            durations.push(duration);
            durations.len()
        };
        let due: Vec<Hook> = {
            let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            let (due, rest) = hooks.drain(..).partition(|(at, _)| *at == call);
            *hooks = rest;
            due.into_iter().map(|(_, hook)| hook).collect()
        };
        for hook in due {
            hook();
        }
        true
    }
}

/// Throwaway git repository with one commit on `main`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "crew@example.com"])?;
        repo.git(&["config", "user.name", "crew"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.path().join("README.md"), "scratch\n").context("write readme")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-q", "-m", "initial"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
