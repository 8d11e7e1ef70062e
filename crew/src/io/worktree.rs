//! Worktree registry: isolated directories under `.crew/worktrees/<name>/`,
//! each with its own branch and optionally bound to one task.
//!
//! Create and remove hold the per-name lock for their whole duration, so the
//! same name never races with itself. The index has its own short-lived lock
//! and the task registry is only touched through `TaskStore`, which locks per
//! call; nothing cross-resource is held while git or a command runs.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::names::{blocked_pattern, validate_worktree_name};
use crate::core::state_update::TaskUpdate;
use crate::core::types::{TaskStatus, WorktreeStatus};
use crate::error::{Error, Result};
use crate::io::config::WorktreeConfig;
use crate::io::events::{Event, EventLog, EventName, TaskRef, WorktreeRef};
use crate::io::init::CrewPaths;
use crate::io::json_file::{read_json_opt, write_json_atomic};
use crate::io::lock::{FileLock, LockPolicy};
use crate::io::process::run_command_with_timeout;
use crate::io::task_store::TaskStore;
use crate::io::vcs::{VcsBackend, WorktreeInspection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Worktree {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    pub status: WorktreeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kept_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl Worktree {
    fn event_ref(&self) -> WorktreeRef {
        WorktreeRef {
            name: self.name.clone(),
            path: self.path.clone(),
            status: self.status,
        }
    }

    fn require_active(&self) -> Result<()> {
        if self.status == WorktreeStatus::Active {
            return Ok(());
        }
        Err(Error::WorktreeClosed {
            name: self.name.clone(),
            status: self.status.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorktreeIndex {
    worktrees: Vec<Worktree>,
}

impl WorktreeIndex {
    fn get(&self, name: &str) -> Option<&Worktree> {
        self.worktrees.iter().find(|w| w.name == name)
    }

    fn upsert(&mut self, worktree: Worktree) {
        match self.worktrees.iter_mut().find(|w| w.name == worktree.name) {
            Some(existing) => *existing = worktree,
            None => self.worktrees.push(worktree),
        }
    }
}

/// Result of `WorktreeRegistry::run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// stdout then stderr, truncated to the configured limit.
    pub output: String,
}

#[derive(Clone)]
pub struct WorktreeRegistry {
    paths: CrewPaths,
    policy: LockPolicy,
    config: WorktreeConfig,
    vcs: Arc<dyn VcsBackend>,
    tasks: TaskStore,
    events: EventLog,
}

impl WorktreeRegistry {
    pub fn new(
        paths: &CrewPaths,
        policy: LockPolicy,
        config: WorktreeConfig,
        vcs: Arc<dyn VcsBackend>,
        tasks: TaskStore,
        events: EventLog,
    ) -> Self {
        Self {
            paths: paths.clone(),
            policy,
            config,
            vcs,
            tasks,
            events,
        }
    }

    /// Allocate a worktree and branch, binding `task_id` when given.
    ///
    /// The name is free unless an active or kept entry holds it. If binding
    /// the task fails after git created the directory, the directory is
    /// removed again and `worktree.create.failed` is recorded.
    #[instrument(skip_all, fields(name = %name, task_id = ?task_id))]
    pub fn create(
        &self,
        name: &str,
        task_id: Option<u64>,
        base_ref: Option<&str>,
    ) -> Result<Worktree> {
        validate_worktree_name(name)?;
        let _name_lock = self.name_lock(name)?;

        if let Some(existing) = self.load_index()?.get(name)
            && existing.status != WorktreeStatus::Removed
        {
            return Err(Error::NameConflict(name.to_string()));
        }
        let task_ref = match task_id {
            Some(id) => {
                let task = self.tasks.get(id)?;
                if !task.worktree.is_empty() && task.worktree != name {
                    return Err(Error::BindingConflict {
                        task_id: id,
                        worktree: task.worktree,
                    });
                }
                Some(TaskRef::from(&task))
            }
            None => None,
        };

        let worktree = Worktree {
            name: name.to_string(),
            path: self.paths.worktree_path(name),
            branch: format!("{}{}", self.config.branch_prefix, name),
            task_id,
            status: WorktreeStatus::Active,
            created_at: Utc::now(),
            kept_at: None,
            removed_at: None,
        };
        let base_ref = base_ref.unwrap_or(&self.config.base_ref);

        self.emit(
            Event::new(EventName::WorktreeCreateBefore)
                .with_task(task_ref.clone())
                .with_worktree(worktree.event_ref()),
        )?;

        if let Err(err) = self
            .vcs
            .create_worktree(&worktree.path, &worktree.branch, base_ref)
        {
            self.emit_failure(EventName::WorktreeCreateFailed, task_ref, &worktree, &err);
            return Err(err);
        }

        let task_ref = match task_id {
            Some(id) => match self.tasks.bind_worktree(id, name) {
                Ok(task) => Some(TaskRef::from(&task)),
                Err(err) => {
                    if let Err(cleanup) = self.vcs.remove_worktree(&worktree.path, true) {
                        warn!(err = %cleanup, "cleanup after failed bind");
                    }
                    self.emit_failure(EventName::WorktreeCreateFailed, task_ref, &worktree, &err);
                    return Err(err);
                }
            },
            None => None,
        };

        self.modify_index(|index| {
            index.upsert(worktree.clone());
            Ok(())
        })?;
        self.emit(
            Event::new(EventName::WorktreeCreateAfter)
                .with_task(task_ref)
                .with_worktree(worktree.event_ref()),
        )?;
        info!(branch = %worktree.branch, "worktree created");
        Ok(worktree)
    }

    pub fn get(&self, name: &str) -> Result<Worktree> {
        self.load_index()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownWorktree(name.to_string()))
    }

    /// Every entry, including kept and removed ones, in creation order.
    pub fn list(&self) -> Result<Vec<Worktree>> {
        Ok(self.load_index()?.worktrees)
    }

    /// Run `command` through `sh -c` inside an active worktree.
    #[instrument(skip_all, fields(name = %name))]
    pub fn run(&self, name: &str, command: &str) -> Result<CommandReport> {
        let worktree = self.get(name)?;
        if worktree.status != WorktreeStatus::Active {
            return Err(Error::UnknownWorktree(name.to_string()));
        }
        if let Some(pattern) = blocked_pattern(command, &self.config.blocked_commands) {
            return Err(Error::invalid(format!(
                "command refused: contains blocked pattern '{pattern}'"
            )));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&worktree.path);
        let timeout = self.config.command_timeout();
        let output =
            run_command_with_timeout(cmd, None, timeout, self.config.output_limit_bytes)?;
        if output.timed_out {
            return Err(Error::Timeout {
                operation: format!("command in worktree '{name}'"),
                after: timeout,
            });
        }
        Ok(CommandReport {
            exit_code: output.status.code(),
            output: output.combined_text(),
        })
    }

    /// Branch and pending changes; removed worktrees have nothing to inspect.
    pub fn status(&self, name: &str) -> Result<WorktreeInspection> {
        let worktree = self.get(name)?;
        if worktree.status == WorktreeStatus::Removed {
            return Err(Error::WorktreeClosed {
                name: worktree.name,
                status: worktree.status.to_string(),
            });
        }
        self.vcs.inspect(&worktree.path)
    }

    /// Close an active worktree but keep its directory. The bound task is
    /// left as is.
    #[instrument(skip_all, fields(name = %name))]
    pub fn keep(&self, name: &str) -> Result<Worktree> {
        let _name_lock = self.name_lock(name)?;
        let kept = self.modify_index(|index| {
            let entry = index
                .worktrees
                .iter_mut()
                .find(|w| w.name == name)
                .ok_or_else(|| Error::UnknownWorktree(name.to_string()))?;
            entry.require_active()?;
            entry.status = WorktreeStatus::Kept;
            entry.kept_at = Some(Utc::now());
            Ok(entry.clone())
        })?;
        let task_ref = self.task_ref(kept.task_id);
        self.emit(
            Event::new(EventName::WorktreeKeep)
                .with_task(task_ref)
                .with_worktree(kept.event_ref()),
        )?;
        info!("worktree kept");
        Ok(kept)
    }

    /// Destroy an active worktree's directory, then unbind its task
    /// (completing it first when `complete_task` is set). If the directory
    /// cannot be removed the index and the task are left untouched.
    ///
    /// A failure after the directory is gone leaves the entry active, so
    /// calling `remove` again finishes the task and index steps.
    #[instrument(skip_all, fields(name = %name, force = force, complete_task = complete_task))]
    pub fn remove(&self, name: &str, force: bool, complete_task: bool) -> Result<Worktree> {
        let _name_lock = self.name_lock(name)?;
        let worktree = self.get(name)?;
        worktree.require_active()?;

        let task_ref = self.task_ref(worktree.task_id);
        self.emit(
            Event::new(EventName::WorktreeRemoveBefore)
                .with_task(task_ref.clone())
                .with_worktree(worktree.event_ref()),
        )?;

        if let Err(err) = self.vcs.remove_worktree(&worktree.path, force) {
            self.emit_failure(EventName::WorktreeRemoveFailed, task_ref, &worktree, &err);
            return Err(err);
        }

        let finished = self.finish_removal(name, worktree.task_id, complete_task);
        let (removed, task_ref) = match finished {
            Ok(done) => done,
            Err(err) => {
                warn!(err = %err, "directory removed but bookkeeping failed");
                self.emit_failure(EventName::WorktreeRemoveFailed, task_ref, &worktree, &err);
                return Err(err);
            }
        };
        self.emit(
            Event::new(EventName::WorktreeRemoveAfter)
                .with_task(task_ref)
                .with_worktree(removed.event_ref()),
        )?;
        info!("worktree removed");
        Ok(removed)
    }

    /// Task first, index last: the entry only reads `removed` once its task
    /// is released. Both steps are idempotent.
    fn finish_removal(
        &self,
        name: &str,
        task_id: Option<u64>,
        complete_task: bool,
    ) -> Result<(Worktree, Option<TaskRef>)> {
        let task_ref = match task_id {
            Some(id) => self.release_task(id, complete_task)?,
            None => None,
        };
        let removed = self.modify_index(|index| {
            let entry = index
                .worktrees
                .iter_mut()
                .find(|w| w.name == name)
                .ok_or_else(|| Error::UnknownWorktree(name.to_string()))?;
            entry.status = WorktreeStatus::Removed;
            entry.removed_at = Some(Utc::now());
            Ok(entry.clone())
        })?;
        Ok((removed, task_ref))
    }

    fn release_task(&self, id: u64, complete_task: bool) -> Result<Option<TaskRef>> {
        if complete_task {
            match self.tasks.update(id, &TaskUpdate::status(TaskStatus::Completed)) {
                Ok(_) => {}
                Err(Error::TaskNotFound(_)) => {
                    warn!(id, "bound task disappeared before completion");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
        match self.tasks.unbind_worktree(id) {
            Ok(task) => Ok(Some(TaskRef::from(&task))),
            Err(Error::TaskNotFound(_)) => {
                warn!(id, "bound task disappeared before unbinding");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn task_ref(&self, task_id: Option<u64>) -> Option<TaskRef> {
        let id = task_id?;
        match self.tasks.get(id) {
            Ok(task) => Some(TaskRef::from(&task)),
            Err(err) => {
                warn!(id, err = %err, "bound task unreadable");
                None
            }
        }
    }

    fn emit(&self, event: Event) -> Result<()> {
        self.events.append(&event)
    }

    fn emit_failure(
        &self,
        name: EventName,
        task: Option<TaskRef>,
        worktree: &Worktree,
        err: &Error,
    ) {
        let event = Event::new(name)
            .with_task(task)
            .with_worktree(worktree.event_ref())
            .with_error(err.to_string());
        if let Err(log_err) = self.events.append(&event) {
            warn!(err = %log_err, "failed to record failure event");
        }
    }

    fn name_lock(&self, name: &str) -> Result<FileLock> {
        FileLock::acquire(&self.paths.lock_path("worktrees", name), &self.policy)
    }

    fn load_index(&self) -> Result<WorktreeIndex> {
        Ok(read_json_opt(&self.paths.worktree_index_path)?.unwrap_or_default())
    }

    fn modify_index<T>(&self, apply: impl FnOnce(&mut WorktreeIndex) -> Result<T>) -> Result<T> {
        let _lock = FileLock::acquire(
            &self.paths.lock_path("worktrees", "index"),
            &self.policy,
        )?;
        let mut index = self.load_index()?;
        let out = apply(&mut index)?;
        write_json_atomic(&self.paths.worktree_index_path, &index)?;
        Ok(out)
    }
}
