//! Deterministic selection of claimable work.

use crate::core::task::Task;

/// Claimable tasks in ascending id order (first-id-wins tie-break).
pub fn unclaimed<'a, I>(tasks: I) -> Vec<&'a Task>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut found: Vec<&Task> = tasks.into_iter().filter(|t| t.is_claimable()).collect();
    found.sort_by_key(|t| t.id);
    found
}

/// The earliest claimable task, if any.
pub fn first_claimable<'a, I>(tasks: I) -> Option<&'a Task>
where
    I: IntoIterator<Item = &'a Task>,
{
    tasks
        .into_iter()
        .filter(|t| t.is_claimable())
        .min_by_key(|t| t.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::task_set;

    #[test]
    fn skips_blocked_owned_and_started_tasks() {
        let mut tasks = task_set(&[(1, &[]), (2, &[1]), (3, &[]), (4, &[]), (5, &[])]);
        tasks.get_mut(&3).expect("task 3").owner = "alice".to_string();
        tasks.get_mut(&4).expect("task 4").status = TaskStatus::InProgress;

        let ids: Vec<u64> = unclaimed(tasks.values()).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 5]);
    }

    #[test]
    fn first_claimable_prefers_lowest_id() {
        let tasks = task_set(&[(7, &[]), (3, &[]), (5, &[])]);
        let mut shuffled: Vec<&Task> = tasks.values().collect();
        shuffled.reverse();
        assert_eq!(first_claimable(shuffled).map(|t| t.id), Some(3));
    }

    #[test]
    fn nothing_claimable_when_everything_is_blocked() {
        let mut tasks = task_set(&[(1, &[])]);
        tasks.get_mut(&1).expect("task 1").status = TaskStatus::Completed;
        assert!(first_claimable(tasks.values()).is_none());
    }
}
