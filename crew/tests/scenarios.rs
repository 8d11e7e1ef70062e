//! End-to-end coordination scenarios driven through the public stores.
//!
//! Each test sets up a fresh `.crew/` via `TestCrew` (fake VCS backend, fast
//! lock retries) and checks the records other agents would observe.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crew::ErrorKind;
use crew::autonomy::{AutonomyLoop, ShutdownReason};
use crew::core::decision::{Action, Decision};
use crew::core::state_update::TaskUpdate;
use crew::core::types::{MemberStatus, RequestKind, RequestStatus, TaskStatus, WorktreeStatus};
use crew::dispatch::{Control, Toolbox};
use crew::io::events::EventName;
use crew::test_support::{RecordingSleeper, ScriptedDecisionMaker, TestCrew};

/// Completing a shared blocker unblocks every dependent at once.
#[test]
fn completing_blocker_unblocks_dependents() {
    let crew = TestCrew::new();
    let tasks = &crew.ws.tasks;
    tasks.create("Setup", "").expect("1");
    tasks.create("Build", "").expect("2");
    tasks.create("Test", "").expect("3");
    for id in [2, 3] {
        tasks
            .update(
                id,
                &TaskUpdate {
                    add_blocked_by: vec![1],
                    ..TaskUpdate::default()
                },
            )
            .expect("block");
    }
    assert_eq!(
        tasks.scan_unclaimed().expect("scan").iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![1]
    );

    tasks
        .update(1, &TaskUpdate::status(TaskStatus::Completed))
        .expect("complete");

    for id in [2, 3] {
        assert!(tasks.get(id).expect("task").blocked_by.is_empty());
    }
    assert_eq!(
        tasks.scan_unclaimed().expect("scan").iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![2, 3]
    );
    let completed: Vec<_> = crew
        .ws
        .events
        .list()
        .expect("events")
        .into_iter()
        .filter(|e| e.event == EventName::TaskCompleted)
        .filter_map(|e| e.task.map(|t| t.id))
        .collect();
    assert_eq!(completed, vec![1]);
}

/// Two agents racing for the same task: one owner, one Conflict.
#[test]
fn simultaneous_claims_have_one_winner() {
    let crew = TestCrew::new();
    crew.ws.tasks.create("Setup", "").expect("1");
    crew.ws.tasks.create("Build", "").expect("2");

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|owner| {
            let tasks = crew.ws.tasks.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (owner, tasks.claim(2, owner))
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();

    let winners: Vec<&str> = results
        .iter()
        .filter(|(_, r)| r.is_ok())
        .map(|(owner, _)| *owner)
        .collect();
    assert_eq!(winners.len(), 1);
    let loser = results.iter().find(|(_, r)| r.is_err()).expect("a loser");
    assert_eq!(
        loser.1.as_ref().map_err(|e| e.kind()).unwrap_err(),
        ErrorKind::Conflict
    );
    let task = crew.ws.tasks.get(2).expect("task");
    assert_eq!(task.owner, winners[0]);
    assert_eq!(task.status, TaskStatus::InProgress);
}

/// Removing a bound worktree with completion closes out the task.
#[test]
fn remove_with_completion_closes_task() {
    let crew = TestCrew::new();
    for i in 1..=5 {
        crew.ws.tasks.create(&format!("task {i}"), "").expect("task");
    }
    crew.ws.worktrees.create("w1", Some(5), None).expect("create");

    let removed = crew.ws.worktrees.remove("w1", false, true).expect("remove");

    assert_eq!(removed.status, WorktreeStatus::Removed);
    let task = crew.ws.tasks.get(5).expect("task");
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.worktree.is_empty());
    assert_eq!(
        crew.ws.worktrees.get("w1").expect("w1").status,
        WorktreeStatus::Removed
    );

    let events = crew.ws.events.list().expect("events");
    let before = events
        .iter()
        .position(|e| e.event == EventName::WorktreeRemoveBefore)
        .expect("before");
    let after = events
        .iter()
        .position(|e| e.event == EventName::WorktreeRemoveAfter)
        .expect("after");
    assert!(before < after);
    let task_ref = events[after].task.as_ref().expect("task ref");
    assert_eq!((task_ref.id, task_ref.status), (5, TaskStatus::Completed));
}

/// A rejected shutdown keeps the agent running and settles the request.
#[test]
fn rejected_shutdown_is_final() {
    let crew = TestCrew::new();
    let id = crew
        .ws
        .correlator
        .initiate("A", "B", RequestKind::Shutdown, None)
        .expect("initiate");

    let result = Toolbox::new(&crew.ws, "B")
        .dispatch(&Action::RespondShutdown {
            correlation_id: id.clone(),
            approve: false,
            reason: Some("mid-task".to_string()),
        })
        .expect("respond");

    assert_eq!(result.control, Control::Continue);
    assert_eq!(
        crew.ws.correlator.get(&id).expect("request").status,
        RequestStatus::Rejected
    );
    let err = crew.ws.correlator.respond(&id, true, None).unwrap_err();
    assert!(matches!(err, crew::Error::DuplicateResponse { .. }));
    assert_eq!(
        crew.ws.correlator.get(&id).expect("request").status,
        RequestStatus::Rejected
    );

    let replies = crew.ws.mailbox.read_inbox("A").expect("inbox");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].correlation_id.as_deref(), Some(id.as_str()));
    assert_eq!(replies[0].approve, Some(false));
}

/// An idle agent with nothing to do shuts down after exactly the idle window.
#[test]
fn idle_window_expires_exactly_once() {
    let crew = TestCrew::new();
    let decider = ScriptedDecisionMaker::new(Vec::new());
    let sleeper = RecordingSleeper::new();
    let mut agent =
        AutonomyLoop::new(&crew.ws, &decider, &sleeper, "idler", "helper").expect("agent");

    let outcome = agent.run(None).expect("run");

    assert_eq!(outcome.reason, ShutdownReason::IdleTimeout);
    assert_eq!(outcome.activations, 1);
    assert_eq!(sleeper.calls(), 12);
    let waited: Duration = sleeper.durations().iter().sum();
    assert_eq!(waited, Duration::from_secs(60));
    assert_eq!(decider.seen_turns().len(), 1);
    let member = crew
        .ws
        .roster
        .load()
        .expect("roster")
        .member("idler")
        .cloned()
        .expect("member");
    assert_eq!(member.status, MemberStatus::Shutdown);
}

/// A message arriving mid-idle resumes work instead of timing out.
#[test]
fn message_during_idle_resumes_agent() {
    let crew = TestCrew::new();
    let decider = ScriptedDecisionMaker::new(vec![
        Decision::Stop {
            summary: String::new(),
        },
        Decision::Act {
            actions: vec![Action::SendMessage {
                to: "lead".to_string(),
                content: "on it".to_string(),
            }],
            note: "ack".to_string(),
        },
    ]);
    let sleeper = RecordingSleeper::new();
    sleeper.on_call(3, {
        let mailbox = crew.ws.mailbox.clone();
        move || {
            mailbox
                .send("lead", "alice", "please review", crew::core::types::MessageKind::Message, None)
                .expect("send");
        }
    });
    let mut agent =
        AutonomyLoop::new(&crew.ws, &decider, &sleeper, "alice", "coder").expect("agent");

    let outcome = agent.run(None).expect("run");

    assert_eq!(outcome.activations, 2);
    // 3 polls before the message, then a fresh full window.
    assert_eq!(sleeper.calls(), 3 + 12);
    let lead = crew.ws.mailbox.read_inbox("lead").expect("lead");
    assert_eq!(lead[0].content, "on it");
    assert!(
        agent
            .conversation()
            .turns()
            .iter()
            .any(|t| t.content.contains("from lead: please review"))
    );
}
