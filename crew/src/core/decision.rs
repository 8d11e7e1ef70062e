//! What a decision-maker may ask an agent to do next.

use serde::{Deserialize, Serialize};

use crate::core::types::TaskStatus;

/// One decision round: either a batch of actions or a request to stop and go
/// idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    Act {
        actions: Vec<Action>,
        #[serde(default)]
        note: String,
    },
    Stop {
        #[serde(default)]
        summary: String,
    },
}

/// The closed set of side-effecting tools an agent exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Action {
    ListTasks,
    GetTask {
        id: u64,
    },
    CreateTask {
        subject: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        blocked_by: Vec<u64>,
    },
    UpdateTask {
        id: u64,
        #[serde(default)]
        status: Option<TaskStatus>,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        add_blocked_by: Vec<u64>,
        #[serde(default)]
        add_blocks: Vec<u64>,
    },
    ClaimTask {
        id: u64,
    },
    SendMessage {
        to: String,
        content: String,
    },
    Broadcast {
        content: String,
    },
    ReadInbox,
    CreateWorktree {
        name: String,
        #[serde(default)]
        task_id: Option<u64>,
        #[serde(default)]
        base_ref: Option<String>,
    },
    RunInWorktree {
        name: String,
        command: String,
    },
    WorktreeStatus {
        name: String,
    },
    KeepWorktree {
        name: String,
    },
    RemoveWorktree {
        name: String,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        complete_task: bool,
    },
    ListWorktrees,
    RequestShutdown {
        target: String,
    },
    RespondShutdown {
        correlation_id: String,
        approve: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    SubmitPlan {
        plan: String,
    },
    ReviewPlan {
        correlation_id: String,
        approve: bool,
        #[serde(default)]
        feedback: Option<String>,
    },
    /// Nothing left to do right now; enter the idle phase.
    Idle,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListTasks => "list_tasks",
            Self::GetTask { .. } => "get_task",
            Self::CreateTask { .. } => "create_task",
            Self::UpdateTask { .. } => "update_task",
            Self::ClaimTask { .. } => "claim_task",
            Self::SendMessage { .. } => "send_message",
            Self::Broadcast { .. } => "broadcast",
            Self::ReadInbox => "read_inbox",
            Self::CreateWorktree { .. } => "create_worktree",
            Self::RunInWorktree { .. } => "run_in_worktree",
            Self::WorktreeStatus { .. } => "worktree_status",
            Self::KeepWorktree { .. } => "keep_worktree",
            Self::RemoveWorktree { .. } => "remove_worktree",
            Self::ListWorktrees => "list_worktrees",
            Self::RequestShutdown { .. } => "request_shutdown",
            Self::RespondShutdown { .. } => "respond_shutdown",
            Self::SubmitPlan { .. } => "submit_plan",
            Self::ReviewPlan { .. } => "review_plan",
            Self::Idle => "idle",
        }
    }
}
