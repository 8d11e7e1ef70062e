//! Append-only lifecycle audit trail (`.crew/worktrees/events.jsonl`).
//!
//! Writers append under a short-lived lock; readers parse the whole file.
//! Before/after/failed triples let a reader distinguish a crash in the middle
//! of a destructive step from a clean one.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::task::Task;
use crate::core::types::{TaskStatus, WorktreeStatus};
use crate::error::Result;
use crate::io::init::CrewPaths;
use crate::io::json_file::{append_json_line, read_lines};
use crate::io::lock::{FileLock, LockPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "worktree.create.before")]
    WorktreeCreateBefore,
    #[serde(rename = "worktree.create.after")]
    WorktreeCreateAfter,
    #[serde(rename = "worktree.create.failed")]
    WorktreeCreateFailed,
    #[serde(rename = "worktree.remove.before")]
    WorktreeRemoveBefore,
    #[serde(rename = "worktree.remove.after")]
    WorktreeRemoveAfter,
    #[serde(rename = "worktree.remove.failed")]
    WorktreeRemoveFailed,
    #[serde(rename = "worktree.keep")]
    WorktreeKeep,
    #[serde(rename = "task.completed")]
    TaskCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: u64,
    pub status: TaskStatus,
}

impl From<&Task> for TaskRef {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            status: task.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRef {
    pub name: String,
    pub path: PathBuf,
    pub status: WorktreeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    pub event: EventName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts: DateTime<Utc>,
}

impl Event {
    pub fn new(event: EventName) -> Self {
        Self {
            event,
            task: None,
            worktree: None,
            error: None,
            ts: Utc::now(),
        }
    }

    pub fn with_task(mut self, task: Option<TaskRef>) -> Self {
        self.task = task;
        self
    }

    pub fn with_worktree(mut self, worktree: WorktreeRef) -> Self {
        self.worktree = Some(worktree);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    lock_path: PathBuf,
    policy: LockPolicy,
}

impl EventLog {
    pub fn new(paths: &CrewPaths, policy: LockPolicy) -> Self {
        Self {
            path: paths.events_path.clone(),
            lock_path: paths.lock_path("events", "log"),
            policy,
        }
    }

    pub fn append(&self, event: &Event) -> Result<()> {
        let _lock = FileLock::acquire(&self.lock_path, &self.policy)?;
        append_json_line(&self.path, event)?;
        debug!(event = ?event.event, "event appended");
        Ok(())
    }

    /// Events in append order. Lines that fail to parse are skipped.
    pub fn list(&self) -> Result<Vec<Event>> {
        let contents = read_lines(&self.path)?;
        let mut events = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(line = index + 1, err = %err, "skipping malformed event"),
            }
        }
        Ok(events)
    }

    /// The last `limit` events, oldest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Event>> {
        let mut events = self.list()?;
        let len = events.len();
        if len > limit {
            events = events.split_off(len - limit);
        }
        Ok(events)
    }
}
