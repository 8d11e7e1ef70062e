//! Task-graph transitions applied to an in-memory snapshot.
//!
//! Every function here mutates a `BTreeMap<u64, Task>` and either succeeds with
//! the whole change applied or fails before touching anything the caller will
//! persist (the store works on a copy and discards it on error). The dependency
//! invariant holds on every successful return.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::core::task::Task;
use crate::core::types::TaskStatus;
use crate::error::{Error, Result};

/// Requested field changes for `TaskStore::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub owner: Option<String>,
    pub add_blocked_by: Vec<u64>,
    pub add_blocks: Vec<u64>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.owner.is_none()
            && self.add_blocked_by.is_empty()
            && self.add_blocks.is_empty()
    }
}

/// What an update touched. `changed` lists every record that must be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub changed: BTreeSet<u64>,
    /// True when this update moved the task into `completed`.
    pub completed: bool,
    /// Tasks whose `blockedBy` became empty because of the completion.
    pub unblocked: Vec<u64>,
}

pub fn apply_update(
    tasks: &mut BTreeMap<u64, Task>,
    id: u64,
    update: &TaskUpdate,
    now: DateTime<Utc>,
) -> Result<UpdateSummary> {
    let current_status = tasks.get(&id).ok_or(Error::TaskNotFound(id))?.status;

    for other in update.add_blocked_by.iter().chain(&update.add_blocks) {
        if *other == id {
            return Err(Error::invalid(format!("task {id} cannot depend on itself")));
        }
        if !tasks.contains_key(other) {
            return Err(Error::TaskNotFound(*other));
        }
    }
    if current_status == TaskStatus::Completed
        && update.status.is_some_and(|s| s != TaskStatus::Completed)
    {
        return Err(Error::invalid(format!(
            "task {id} is completed and cannot move back"
        )));
    }

    let mut summary = UpdateSummary::default();

    if let Some(owner) = &update.owner
        && let Some(task) = tasks.get_mut(&id)
        && task.owner != *owner
    {
        task.owner = owner.clone();
        summary.changed.insert(id);
    }

    for blocker in &update.add_blocked_by {
        add_edge(tasks, *blocker, id, &mut summary)?;
    }
    for blocked in &update.add_blocks {
        add_edge(tasks, id, *blocked, &mut summary)?;
    }

    match update.status {
        Some(TaskStatus::Completed) if current_status != TaskStatus::Completed => {
            complete(tasks, id, &mut summary);
        }
        Some(status) if status != current_status => {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = status;
                summary.changed.insert(id);
            }
        }
        _ => {}
    }

    touch(tasks, &summary.changed, now);
    Ok(summary)
}

/// Compare-and-set claim: only a claimable task can be taken.
pub fn claim(
    tasks: &mut BTreeMap<u64, Task>,
    id: u64,
    owner: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
    if let Some(reason) = task.claim_blocker() {
        return Err(Error::ClaimConflict { id, reason });
    }
    task.owner = owner.to_string();
    task.status = TaskStatus::InProgress;
    task.updated_at = now;
    Ok(())
}

/// Bind a worktree; a pending task advances to `in_progress`.
pub fn bind_worktree(
    tasks: &mut BTreeMap<u64, Task>,
    id: u64,
    worktree: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
    if !task.worktree.is_empty() && task.worktree != worktree {
        return Err(Error::BindingConflict {
            task_id: id,
            worktree: task.worktree.clone(),
        });
    }
    task.worktree = worktree.to_string();
    if task.status == TaskStatus::Pending {
        task.status = TaskStatus::InProgress;
    }
    task.updated_at = now;
    Ok(())
}

pub fn unbind_worktree(
    tasks: &mut BTreeMap<u64, Task>,
    id: u64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let task = tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
    if task.worktree.is_empty() {
        return Ok(false);
    }
    task.worktree.clear();
    task.updated_at = now;
    Ok(true)
}

/// True if `blocked` waiting on `blocker` would close a cycle, i.e. `blocker`
/// already (transitively) waits on `blocked`.
pub fn would_create_cycle(tasks: &BTreeMap<u64, Task>, blocker: u64, blocked: u64) -> bool {
    let mut stack = vec![blocker];
    let mut seen = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if current == blocked {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(task) = tasks.get(&current) {
            stack.extend(task.blocked_by.iter().copied());
        }
    }
    false
}

fn add_edge(
    tasks: &mut BTreeMap<u64, Task>,
    blocker: u64,
    blocked: u64,
    summary: &mut UpdateSummary,
) -> Result<()> {
    let blocker_done = tasks
        .get(&blocker)
        .is_some_and(|t| t.status == TaskStatus::Completed);
    let blocked_done = tasks
        .get(&blocked)
        .is_some_and(|t| t.status == TaskStatus::Completed);
    // A completed blocker is already satisfied; a completed task waits on nothing.
    if blocker_done || blocked_done {
        return Ok(());
    }
    if would_create_cycle(tasks, blocker, blocked) {
        return Err(Error::invalid(format!(
            "task {blocked} waiting on {blocker} would create a dependency cycle"
        )));
    }
    if let Some(task) = tasks.get_mut(&blocked)
        && task.blocked_by.insert(blocker)
    {
        summary.changed.insert(blocked);
    }
    if let Some(task) = tasks.get_mut(&blocker)
        && task.blocks.insert(blocked)
    {
        summary.changed.insert(blocker);
    }
    Ok(())
}

fn complete(tasks: &mut BTreeMap<u64, Task>, id: u64, summary: &mut UpdateSummary) {
    for task in tasks.values_mut() {
        if task.id != id && task.blocked_by.remove(&id) {
            summary.changed.insert(task.id);
            if task.blocked_by.is_empty() {
                summary.unblocked.push(task.id);
            }
        }
    }
    if let Some(task) = tasks.get_mut(&id) {
        task.status = TaskStatus::Completed;
        task.blocks.clear();
    }
    summary.changed.insert(id);
    summary.completed = true;
}

fn touch(tasks: &mut BTreeMap<u64, Task>, ids: &BTreeSet<u64>, now: DateTime<Utc>) {
    for id in ids {
        if let Some(task) = tasks.get_mut(id) {
            task.updated_at = now;
        }
    }
}
