//! File-backed task registry (`.crew/tasks/task_<id>.json`).
//!
//! Every mutation runs under one registry lock: load the full set, apply a
//! `core::state_update` transition to a copy, check the graph invariants, then
//! write only the records that changed. If a later write fails the records
//! already written are restored from the pre-mutation snapshot. Reads take no
//! lock since each record is replaced atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::invariants::validate_invariants;
use crate::core::selector::unclaimed;
use crate::core::state_update::{self, TaskUpdate};
use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::io::events::{Event, EventLog, EventName, TaskRef};
use crate::io::init::CrewPaths;
use crate::io::json_file::{read_json, write_json_atomic};
use crate::io::lock::{FileLock, LockPolicy};

#[derive(Debug, Clone)]
pub struct TaskStore {
    paths: CrewPaths,
    lock_path: PathBuf,
    policy: LockPolicy,
    events: Option<EventLog>,
}

impl TaskStore {
    pub fn new(paths: &CrewPaths, policy: LockPolicy) -> Self {
        Self {
            paths: paths.clone(),
            lock_path: paths.lock_path("tasks", "registry"),
            policy,
            events: None,
        }
    }

    /// Record `task.completed` events in `events`.
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    #[instrument(skip_all, fields(subject = %subject))]
    pub fn create(&self, subject: &str, description: &str) -> Result<Task> {
        if subject.trim().is_empty() {
            return Err(Error::invalid("task subject must not be empty"));
        }
        let _lock = self.lock()?;
        let tasks = self.load_all()?;
        let id = tasks.keys().next_back().map_or(1, |max| max + 1);
        let task = Task::new(id, subject, description, Utc::now());
        write_json_atomic(&self.paths.task_path(id), &task)?;
        info!(id, "task created");
        Ok(task)
    }

    pub fn get(&self, id: u64) -> Result<Task> {
        let path = self.paths.task_path(id);
        if !path.exists() {
            return Err(Error::TaskNotFound(id));
        }
        read_json(&path)
    }

    /// All tasks ordered by id.
    pub fn list(&self) -> Result<Vec<Task>> {
        Ok(self.load_all()?.into_values().collect())
    }

    #[instrument(skip_all, fields(id = id))]
    pub fn update(&self, id: u64, update: &TaskUpdate) -> Result<Task> {
        let (task, summary) = self.mutate(
            |tasks| state_update::apply_update(tasks, id, update, Utc::now()),
            id,
        )?;
        if summary.completed {
            info!(id, unblocked = ?summary.unblocked, "task completed");
            self.record_completion(&task);
        }
        Ok(task)
    }

    /// Atomic compare-and-set claim. Conflict when the task is not claimable
    /// at write time.
    #[instrument(skip_all, fields(id = id, owner = %owner))]
    pub fn claim(&self, id: u64, owner: &str) -> Result<Task> {
        let result = self.mutate(
            |tasks| {
                state_update::claim(tasks, id, owner, Utc::now())?;
                Ok(BTreeSet::from([id]))
            },
            id,
        );
        match result {
            Ok((task, _)) => {
                info!("task claimed");
                Ok(task)
            }
            Err(err) => {
                if let Error::ClaimConflict { reason, .. } = &err {
                    warn!(reason = %reason, "claim lost");
                }
                Err(err)
            }
        }
    }

    pub fn bind_worktree(&self, id: u64, worktree: &str) -> Result<Task> {
        self.mutate(
            |tasks| {
                state_update::bind_worktree(tasks, id, worktree, Utc::now())?;
                Ok(BTreeSet::from([id]))
            },
            id,
        )
        .map(|(task, _)| task)
    }

    pub fn unbind_worktree(&self, id: u64) -> Result<Task> {
        self.mutate(
            |tasks| {
                let changed = state_update::unbind_worktree(tasks, id, Utc::now())?;
                Ok(if changed { BTreeSet::from([id]) } else { BTreeSet::new() })
            },
            id,
        )
        .map(|(task, _)| task)
    }

    /// Claimable tasks in ascending id order.
    pub fn scan_unclaimed(&self) -> Result<Vec<Task>> {
        let tasks = self.load_all()?;
        Ok(unclaimed(tasks.values()).into_iter().cloned().collect())
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path, &self.policy)
    }

    /// Apply `change` to a copy of the registry under the lock and persist the
    /// records it reports as changed. Returns the post-change record for `id`.
    fn mutate<T, F>(&self, change: F, id: u64) -> Result<(Task, T)>
    where
        F: FnOnce(&mut BTreeMap<u64, Task>) -> Result<T>,
        T: ChangedIds,
    {
        let _lock = self.lock()?;
        let before = self.load_all()?;
        let mut after = before.clone();
        let out = change(&mut after)?;

        let errors = validate_invariants(&after);
        if !errors.is_empty() {
            return Err(Error::invalid(format!(
                "task graph invariants failed: {}",
                errors.join("; ")
            )));
        }

        self.persist(&before, &after, out.changed_ids())?;
        let task = after.remove(&id).ok_or(Error::TaskNotFound(id))?;
        Ok((task, out))
    }

    fn persist(
        &self,
        before: &BTreeMap<u64, Task>,
        after: &BTreeMap<u64, Task>,
        changed: &BTreeSet<u64>,
    ) -> Result<()> {
        let mut written = Vec::new();
        for id in changed {
            let Some(task) = after.get(id) else {
                continue;
            };
            if let Err(err) = write_json_atomic(&self.paths.task_path(*id), task) {
                self.roll_back(before, &written);
                return Err(err);
            }
            written.push(*id);
        }
        debug!(count = written.len(), "task records written");
        Ok(())
    }

    fn roll_back(&self, before: &BTreeMap<u64, Task>, written: &[u64]) {
        for id in written {
            if let Some(original) = before.get(id)
                && let Err(err) = write_json_atomic(&self.paths.task_path(*id), original)
            {
                warn!(id, err = %err, "rollback of task record failed");
            }
        }
    }

    fn record_completion(&self, task: &Task) {
        let Some(events) = &self.events else {
            return;
        };
        let event = Event::new(EventName::TaskCompleted).with_task(Some(TaskRef::from(task)));
        if let Err(err) = events.append(&event) {
            warn!(id = task.id, err = %err, "failed to record task.completed");
        }
    }

    fn load_all(&self) -> Result<BTreeMap<u64, Task>> {
        let dir = &self.paths.tasks_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(Error::storage("list tasks", dir, err)),
        };
        let mut tasks = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::storage("list tasks", dir, err))?;
            let file_name = entry.file_name();
            let Some(id) = file_name.to_str().and_then(parse_task_file_name) else {
                continue;
            };
            let task: Task = read_json(&entry.path())?;
            tasks.insert(id, task);
        }
        Ok(tasks)
    }
}

/// `task_<id>.json` → id. Temp files and anything else are ignored.
fn parse_task_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("task_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Lets `mutate` accept both a full update summary and a plain id set.
trait ChangedIds {
    fn changed_ids(&self) -> &BTreeSet<u64>;
}

impl ChangedIds for BTreeSet<u64> {
    fn changed_ids(&self) -> &BTreeSet<u64> {
        self
    }
}

impl ChangedIds for state_update::UpdateSummary {
    fn changed_ids(&self) -> &BTreeSet<u64> {
        &self.changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::error::ErrorKind;

    fn store() -> (tempfile::TempDir, TaskStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(&CrewPaths::new(temp.path()), LockPolicy::default());
        (temp, store)
    }

    #[test]
    fn ids_are_monotonic_and_listed_in_order() {
        let (_temp, store) = store();
        for subject in ["a", "b", "c"] {
            store.create(subject, "").expect("create");
        }
        let ids: Vec<u64> = store.list().expect("list").iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.get(2).expect("get").subject, "b");
        assert_eq!(store.get(9).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn update_writes_reciprocal_edges_to_disk() {
        let (_temp, store) = store();
        store.create("setup", "").expect("1");
        store.create("build", "").expect("2");

        let updated = store
            .update(
                2,
                &TaskUpdate {
                    add_blocked_by: vec![1],
                    ..TaskUpdate::default()
                },
            )
            .expect("update");

        assert_eq!(updated.blocked_by, BTreeSet::from([1]));
        assert_eq!(store.get(1).expect("1").blocks, BTreeSet::from([2]));
        assert!(store.scan_unclaimed().expect("scan").iter().all(|t| t.id == 1));
    }

    #[test]
    fn completion_unblocks_and_records_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = CrewPaths::new(temp.path());
        let events = EventLog::new(&paths, LockPolicy::default());
        let store = TaskStore::new(&paths, LockPolicy::default()).with_events(events.clone());
        store.create("setup", "").expect("1");
        store.create("build", "").expect("2");
        store
            .update(
                1,
                &TaskUpdate {
                    add_blocks: vec![2],
                    ..TaskUpdate::default()
                },
            )
            .expect("edge");

        store
            .update(1, &TaskUpdate::status(TaskStatus::Completed))
            .expect("complete");

        assert!(store.get(2).expect("2").is_claimable());
        let recorded = events.list().expect("events");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event, EventName::TaskCompleted);
        assert_eq!(recorded[0].task.as_ref().map(|t| t.id), Some(1));
    }

    #[test]
    fn unknown_reference_leaves_records_untouched() {
        let (_temp, store) = store();
        store.create("only", "").expect("1");
        let err = store
            .update(
                1,
                &TaskUpdate {
                    add_blocks: vec![42],
                    ..TaskUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(42)));
        assert!(store.get(1).expect("1").blocks.is_empty());
    }

    #[test]
    fn second_claim_conflicts() {
        let (_temp, store) = store();
        store.create("work", "").expect("1");
        let claimed = store.claim(1, "alice").expect("claim");
        assert_eq!(claimed.status, TaskStatus::InProgress);

        let err = store.claim(1, "bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.get(1).expect("1").owner, "alice");
    }

    #[test]
    fn ignores_temp_and_foreign_files() {
        assert_eq!(parse_task_file_name("task_12.json"), Some(12));
        assert_eq!(parse_task_file_name("task_12.json.tmp"), None);
        assert_eq!(parse_task_file_name("notes.json"), None);
    }
}
