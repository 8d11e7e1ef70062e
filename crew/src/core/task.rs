use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::TaskStatus;

/// A unit of work in the shared task graph (`.crew/tasks/task_<id>.json`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: u64,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    /// Agent holding the task; empty when unowned.
    #[serde(default)]
    pub owner: String,
    /// Ids this task waits on.
    #[serde(rename = "blockedBy", default)]
    pub blocked_by: BTreeSet<u64>,
    /// Ids waiting on this task.
    #[serde(default)]
    pub blocks: BTreeSet<u64>,
    /// Bound worktree name; empty when unbound.
    #[serde(default)]
    pub worktree: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: u64, subject: &str, description: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            subject: subject.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            owner: String::new(),
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            worktree: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending, unowned and not waiting on anything.
    pub fn is_claimable(&self) -> bool {
        self.status == TaskStatus::Pending && self.owner.is_empty() && self.blocked_by.is_empty()
    }

    /// Reason the task cannot be claimed right now, if any.
    pub fn claim_blocker(&self) -> Option<String> {
        if self.status != TaskStatus::Pending {
            return Some(format!("status is {}", self.status));
        }
        if !self.owner.is_empty() {
            return Some(format!("already owned by '{}'", self.owner));
        }
        if !self.blocked_by.is_empty() {
            let ids: Vec<String> = self.blocked_by.iter().map(u64::to_string).collect();
            return Some(format!("blocked by {}", ids.join(", ")));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_claimable() {
        let task = Task::new(1, "Setup", "", Utc::now());
        assert!(task.is_claimable());
        assert_eq!(task.claim_blocker(), None);
    }

    #[test]
    fn blocked_task_explains_why() {
        let mut task = Task::new(2, "Build", "", Utc::now());
        task.blocked_by.insert(1);
        assert!(!task.is_claimable());
        assert_eq!(task.claim_blocker().as_deref(), Some("blocked by 1"));
    }

    #[test]
    fn serializes_blocked_by_in_camel_case() {
        let mut task = Task::new(3, "Test", "run suite", Utc::now());
        task.blocked_by.insert(1);
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["blockedBy"], serde_json::json!([1]));
        assert_eq!(json["status"], "pending");
    }
}
