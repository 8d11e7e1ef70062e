//! Executes decision-maker actions against the shared stores on behalf of one
//! agent.
//!
//! Expected failures (unknown ids, lost races, refused commands, git errors,
//! command timeouts) come back as ordinary tool output so the decision-maker
//! can react. Storage failures are returned as errors and end the agent's run.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::decision::Action;
use crate::core::state_update::TaskUpdate;
use crate::core::types::{MessageKind, RequestKind};
use crate::error::{Error, ErrorKind, Result};
use crate::workspace::Workspace;

/// What the loop should do after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// The agent asked to go idle.
    Idle,
    /// The agent approved its own shutdown.
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub output: String,
    pub control: Control,
}

impl ToolResult {
    fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            control: Control::Continue,
        }
    }

    fn json<T: Serialize>(value: &T) -> Result<Self> {
        let output = serde_json::to_string_pretty(value)
            .map_err(|err| Error::json("<tool output>", err))?;
        Ok(Self::text(output))
    }
}

pub struct Toolbox<'a> {
    workspace: &'a Workspace,
    agent: &'a str,
}

impl<'a> Toolbox<'a> {
    pub fn new(workspace: &'a Workspace, agent: &'a str) -> Self {
        Self { workspace, agent }
    }

    /// Run one action. Only storage failures are returned as `Err`.
    #[instrument(skip_all, fields(agent = %self.agent, tool = action.name()))]
    pub fn dispatch(&self, action: &Action) -> Result<ToolResult> {
        match self.execute(action) {
            Ok(result) => Ok(result),
            Err(err) if err.kind() == ErrorKind::Storage => Err(err),
            Err(err) => {
                debug!(kind = %err.kind(), err = %err, "tool error reported to decision-maker");
                Ok(ToolResult::text(format!("error[{}]: {err}", err.kind())))
            }
        }
    }

    fn execute(&self, action: &Action) -> Result<ToolResult> {
        let ws = self.workspace;
        match action {
            Action::ListTasks => ToolResult::json(&ws.tasks.list()?),
            Action::GetTask { id } => ToolResult::json(&ws.tasks.get(*id)?),
            Action::CreateTask {
                subject,
                description,
                blocked_by,
            } => {
                let task = ws.tasks.create(subject, description)?;
                if blocked_by.is_empty() {
                    return ToolResult::json(&task);
                }
                let update = TaskUpdate {
                    add_blocked_by: blocked_by.clone(),
                    ..TaskUpdate::default()
                };
                ToolResult::json(&ws.tasks.update(task.id, &update)?)
            }
            Action::UpdateTask {
                id,
                status,
                owner,
                add_blocked_by,
                add_blocks,
            } => {
                let update = TaskUpdate {
                    status: *status,
                    owner: owner.clone(),
                    add_blocked_by: add_blocked_by.clone(),
                    add_blocks: add_blocks.clone(),
                };
                if update.is_empty() {
                    return Err(Error::invalid("update_task needs at least one change"));
                }
                ToolResult::json(&ws.tasks.update(*id, &update)?)
            }
            Action::ClaimTask { id } => {
                let task = ws.tasks.claim(*id, self.agent)?;
                Ok(ToolResult::text(format!(
                    "Claimed task #{}: {}",
                    task.id, task.subject
                )))
            }
            Action::SendMessage { to, content } => {
                ws.mailbox
                    .send(self.agent, to, content, MessageKind::Message, None)?;
                Ok(ToolResult::text(format!("Sent message to {to}")))
            }
            Action::Broadcast { content } => {
                let members = ws.roster.member_names()?;
                let delivered = ws.mailbox.broadcast(self.agent, content, &members)?;
                Ok(ToolResult::text(format!(
                    "Broadcast to {delivered} teammates"
                )))
            }
            Action::ReadInbox => ToolResult::json(&ws.mailbox.read_inbox(self.agent)?),
            Action::CreateWorktree {
                name,
                task_id,
                base_ref,
            } => ToolResult::json(&ws.worktrees.create(name, *task_id, base_ref.as_deref())?),
            Action::RunInWorktree { name, command } => {
                let report = ws.worktrees.run(name, command)?;
                let code = report
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                let output = if report.output.trim().is_empty() {
                    "(no output)"
                } else {
                    report.output.as_str()
                };
                Ok(ToolResult::text(format!("exit {code}\n{output}")))
            }
            Action::WorktreeStatus { name } => ToolResult::json(&ws.worktrees.status(name)?),
            Action::KeepWorktree { name } => ToolResult::json(&ws.worktrees.keep(name)?),
            Action::RemoveWorktree {
                name,
                force,
                complete_task,
            } => ToolResult::json(&ws.worktrees.remove(name, *force, *complete_task)?),
            Action::ListWorktrees => ToolResult::json(&ws.worktrees.list()?),
            Action::RequestShutdown { target } => {
                let id = ws
                    .correlator
                    .initiate(self.agent, target, RequestKind::Shutdown, None)?;
                Ok(ToolResult::text(format!(
                    "Shutdown request {id} sent to {target}"
                )))
            }
            Action::RespondShutdown {
                correlation_id,
                approve,
                reason,
            } => {
                self.check_addressed(correlation_id, RequestKind::Shutdown)?;
                ws.correlator
                    .respond(correlation_id, *approve, reason.as_deref())?;
                if *approve {
                    return Ok(ToolResult {
                        output: "Shutdown approved. Exiting.".to_string(),
                        control: Control::Exit,
                    });
                }
                Ok(ToolResult::text("Shutdown rejected. Continuing."))
            }
            Action::SubmitPlan { plan } => {
                let lead = &ws.config.team.lead;
                let id = ws
                    .correlator
                    .initiate(self.agent, lead, RequestKind::Plan, Some(plan))?;
                Ok(ToolResult::text(format!(
                    "Plan {id} submitted to {lead}. Wait for approval."
                )))
            }
            Action::ReviewPlan {
                correlation_id,
                approve,
                feedback,
            } => {
                self.check_addressed(correlation_id, RequestKind::Plan)?;
                let request = ws
                    .correlator
                    .respond(correlation_id, *approve, feedback.as_deref())?;
                Ok(ToolResult::text(format!(
                    "Plan from {} {}",
                    request.initiator, request.status
                )))
            }
            Action::Idle => Ok(ToolResult {
                output: "Entering idle phase.".to_string(),
                control: Control::Idle,
            }),
        }
    }

    /// Only the target of a request may answer it.
    fn check_addressed(&self, correlation_id: &str, kind: RequestKind) -> Result<()> {
        let request = self.workspace.correlator.get(correlation_id)?;
        if request.kind != kind {
            return Err(Error::invalid(format!(
                "request '{correlation_id}' is a {} request, not {kind}",
                request.kind
            )));
        }
        if request.target != self.agent {
            return Err(Error::invalid(format!(
                "request '{correlation_id}' is addressed to '{}'",
                request.target
            )));
        }
        Ok(())
    }
}
