//! Semantic invariants of the task graph.

use std::collections::BTreeMap;

use crate::core::task::Task;

/// Check the dependency invariants over a full task set:
/// - `A ∈ B.blockedBy ⇔ B ∈ A.blocks`
/// - no self edges
/// - every referenced id exists
/// - the record key matches the task id
pub fn validate_invariants(tasks: &BTreeMap<u64, Task>) -> Vec<String> {
    let mut errors = Vec::new();
    for (key, task) in tasks {
        if *key != task.id {
            errors.push(format!("task {}: stored under key {}", task.id, key));
        }
        if task.blocked_by.contains(&task.id) || task.blocks.contains(&task.id) {
            errors.push(format!("task {}: depends on itself", task.id));
        }
        for blocker in &task.blocked_by {
            match tasks.get(blocker) {
                None => errors.push(format!(
                    "task {}: blockedBy references missing task {}",
                    task.id, blocker
                )),
                Some(other) if !other.blocks.contains(&task.id) => errors.push(format!(
                    "task {}: blockedBy {} but task {} does not list it in blocks",
                    task.id, blocker, blocker
                )),
                Some(_) => {}
            }
        }
        for blocked in &task.blocks {
            match tasks.get(blocked) {
                None => errors.push(format!(
                    "task {}: blocks references missing task {}",
                    task.id, blocked
                )),
                Some(other) if !other.blocked_by.contains(&task.id) => errors.push(format!(
                    "task {}: blocks {} but task {} does not list it in blockedBy",
                    task.id, blocked, blocked
                )),
                Some(_) => {}
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task_set;

    #[test]
    fn consistent_graph_has_no_errors() {
        let tasks = task_set(&[(1, &[]), (2, &[1]), (3, &[1])]);
        assert!(validate_invariants(&tasks).is_empty());
    }

    #[test]
    fn reports_one_sided_edges() {
        let mut tasks = task_set(&[(1, &[]), (2, &[1])]);
        tasks.get_mut(&1).expect("task 1").blocks.clear();

        let errors = validate_invariants(&tasks);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("does not list it in blocks"));
    }

    #[test]
    fn reports_missing_references_and_self_edges() {
        let mut tasks = task_set(&[(1, &[])]);
        let task = tasks.get_mut(&1).expect("task 1");
        task.blocked_by.insert(1);
        task.blocks.insert(9);

        let errors = validate_invariants(&tasks);
        assert!(errors.iter().any(|err| err.contains("depends on itself")));
        assert!(errors.iter().any(|err| err.contains("missing task 9")));
    }
}
