//! Per-agent control loop: active work driven by a decision-maker, then idle
//! polling of the mailbox and the task registry, until shutdown.
//!
//! ```text
//! spawn -> active -> idle -> active | shutdown
//! ```
//!
//! The loop never shares memory with other agents. Everything it learns about
//! the team comes from the file-backed stores in [`Workspace`].

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, info_span, warn};

use crate::core::conversation::{Conversation, Identity, Turn};
use crate::core::decision::Decision;
use crate::core::types::{AgentPhase, MessageKind};
use crate::dispatch::{Control, Toolbox};
use crate::error::{Error, ErrorKind};
use crate::io::config::AgentConfig;
use crate::io::decision::{DecisionMaker, DecisionRequest};
use crate::io::mailbox::Message;
use crate::io::prompt::Prompts;
use crate::workspace::Workspace;

/// Blocking wait used between idle polls.
pub trait Sleeper {
    /// Wait up to `duration`. Returns false when woken early by shutdown.
    fn sleep(&self, duration: Duration) -> bool;
}

/// Cancellable sleeper shared by all agents of a team.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every sleeping agent; later sleeps return immediately.
    pub fn trigger(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleeper for ShutdownSignal {
    fn sleep(&self, duration: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, duration, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No message or claimable task arrived within the idle timeout.
    IdleTimeout,
    /// The agent approved a shutdown request.
    Approved,
    /// The team-wide shutdown signal fired.
    Signalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub name: String,
    pub reason: ShutdownReason,
    /// Number of active phases run.
    pub activations: u32,
    /// Tasks claimed while idle, in claim order.
    pub auto_claimed: Vec<u64>,
}

enum ActiveEnd {
    Idle,
    Exit,
}

enum IdleEnd {
    Resume,
    Shutdown(ShutdownReason),
}

pub struct AutonomyLoop<'a, D, S> {
    workspace: &'a Workspace,
    decider: &'a D,
    sleeper: &'a S,
    identity: Identity,
    config: AgentConfig,
    prompts: Prompts,
    conversation: Conversation,
    auto_claimed: Vec<u64>,
}

impl<'a, D: DecisionMaker, S: Sleeper> AutonomyLoop<'a, D, S> {
    pub fn new(
        workspace: &'a Workspace,
        decider: &'a D,
        sleeper: &'a S,
        name: &str,
        role: &str,
    ) -> Result<Self> {
        let identity = Identity {
            name: name.to_string(),
            role: role.to_string(),
            team: workspace.config.team.team_name.clone(),
        };
        Ok(Self {
            workspace,
            decider,
            sleeper,
            identity,
            config: workspace.config.agent.clone(),
            prompts: Prompts::new()?,
            conversation: Conversation::new(),
            auto_claimed: Vec::new(),
        })
    }

    /// Start from an existing transcript, e.g. one compacted elsewhere.
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Run until shutdown. `prompt` is the first instruction of the agent's
    /// first active phase.
    pub fn run(&mut self, prompt: Option<&str>) -> Result<AgentOutcome> {
        let span = info_span!("agent", name = %self.identity.name);
        let _enter = span.enter();

        self.workspace.roster.upsert(
            &self.identity.name,
            &self.identity.role,
            AgentPhase::Active.member_status(),
        )?;
        if self.conversation.is_empty() {
            let block = self.prompts.identity(&self.identity)?;
            self.conversation.push(Turn::user(block));
        }
        if let Some(prompt) = prompt {
            self.conversation.push(Turn::user(prompt));
        }

        let result = self.cycle();
        let marked = self.set_phase(AgentPhase::Shutdown);
        let mut outcome = match (result, marked) {
            (Ok(outcome), marked) => {
                marked?;
                outcome
            }
            (Err(err), Ok(())) => return Err(err),
            (Err(err), Err(mark_err)) => {
                warn!(err = %format!("{mark_err:#}"), "could not mark agent shut down");
                return Err(err);
            }
        };
        outcome.auto_claimed = std::mem::take(&mut self.auto_claimed);
        info!(reason = ?outcome.reason, activations = outcome.activations, "agent shut down");
        Ok(outcome)
    }

    fn cycle(&mut self) -> Result<AgentOutcome> {
        let mut activations = 0;
        loop {
            self.set_phase(AgentPhase::Active)?;
            activations += 1;
            if let ActiveEnd::Exit = self.active_phase()? {
                return Ok(self.outcome(ShutdownReason::Approved, activations));
            }
            self.set_phase(AgentPhase::Idle)?;
            if let IdleEnd::Shutdown(reason) = self.idle_phase()? {
                return Ok(self.outcome(reason, activations));
            }
        }
    }

    fn outcome(&self, reason: ShutdownReason, activations: u32) -> AgentOutcome {
        AgentOutcome {
            name: self.identity.name.clone(),
            reason,
            activations,
            auto_claimed: Vec::new(),
        }
    }

    fn active_phase(&mut self) -> Result<ActiveEnd> {
        self.restore_identity()?;
        let toolbox = Toolbox::new(self.workspace, &self.identity.name);
        let teammates = self.teammates()?;

        for round in 1..=self.config.max_rounds {
            let messages = self.workspace.mailbox.read_inbox(&self.identity.name)?;
            if !messages.is_empty() {
                self.conversation
                    .push(Turn::user(self.prompts.inbox(&messages)?));
            }

            let decision = self.decider.decide(&DecisionRequest {
                identity: &self.identity,
                teammates: &teammates,
                conversation: &self.conversation,
                round,
            })?;
            let actions = match decision {
                Decision::Stop { summary } => {
                    if !summary.is_empty() {
                        self.conversation.push(Turn::assistant(summary));
                    }
                    debug!(round, "decision-maker stopped");
                    return Ok(ActiveEnd::Idle);
                }
                Decision::Act { actions, note } => {
                    let names: Vec<&str> = actions.iter().map(|a| a.name()).collect();
                    let summary = if note.is_empty() {
                        format!("Using tools: {}", names.join(", "))
                    } else {
                        note
                    };
                    self.conversation.push(Turn::assistant(summary));
                    actions
                }
            };

            let mut go_idle = false;
            for action in &actions {
                let result = toolbox.dispatch(action)?;
                self.conversation
                    .push(Turn::tool(format!("{}: {}", action.name(), result.output)));
                match result.control {
                    Control::Continue => {}
                    Control::Idle => {
                        go_idle = true;
                        break;
                    }
                    Control::Exit => return Ok(ActiveEnd::Exit),
                }
            }
            if go_idle {
                return Ok(ActiveEnd::Idle);
            }
        }
        warn!(max_rounds = self.config.max_rounds, "round limit reached, going idle");
        Ok(ActiveEnd::Idle)
    }

    fn idle_phase(&mut self) -> Result<IdleEnd> {
        let interval = self.config.poll_interval().max(Duration::from_secs(1));
        let timeout = self.config.idle_timeout();
        debug!(?interval, ?timeout, "entering idle");

        // The last poll is shortened so the window ends exactly at `timeout`.
        let mut waited = Duration::ZERO;
        loop {
            let step = interval.min(timeout.saturating_sub(waited));
            if !self.sleeper.sleep(step) {
                return Ok(IdleEnd::Shutdown(ShutdownReason::Signalled));
            }
            waited += step;

            let messages = self.workspace.mailbox.read_inbox(&self.identity.name)?;
            if let Some(request) = messages
                .iter()
                .find(|m| m.kind == MessageKind::ShutdownRequest)
            {
                self.approve_shutdown(request)?;
                return Ok(IdleEnd::Shutdown(ShutdownReason::Approved));
            }
            if !messages.is_empty() {
                self.conversation
                    .push(Turn::user(self.prompts.inbox(&messages)?));
                return Ok(IdleEnd::Resume);
            }

            if self.try_auto_claim()? {
                return Ok(IdleEnd::Resume);
            }
            if waited >= timeout {
                break;
            }
        }
        info!(?waited, "idle timeout");
        Ok(IdleEnd::Shutdown(ShutdownReason::IdleTimeout))
    }

    /// Claim the earliest claimable task. A lost race moves on to the next one.
    fn try_auto_claim(&mut self) -> Result<bool> {
        for candidate in self.workspace.tasks.scan_unclaimed()? {
            match self
                .workspace
                .tasks
                .claim(candidate.id, &self.identity.name)
            {
                Ok(task) => {
                    info!(id = task.id, "auto-claimed task");
                    self.conversation
                        .push(Turn::user(self.prompts.auto_claimed(&task)?));
                    self.conversation.push(Turn::assistant(format!(
                        "Claimed task #{}. Working on it.",
                        task.id
                    )));
                    self.auto_claimed.push(task.id);
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    debug!(id = candidate.id, "lost claim race, rescanning");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(false)
    }

    /// An idle agent has nothing to finish, so it accepts a shutdown request.
    fn approve_shutdown(&self, request: &Message) -> Result<()> {
        let Some(id) = request.correlation_id.as_deref() else {
            warn!(from = %request.from, "shutdown request without correlation id");
            return Ok(());
        };
        match self
            .workspace
            .correlator
            .respond(id, true, Some("Idle; shutting down."))
        {
            Ok(_) => Ok(()),
            Err(err @ (Error::DuplicateResponse { .. } | Error::RequestNotFound(_))) => {
                warn!(err = %err, "shutdown request already settled");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn restore_identity(&mut self) -> Result<()> {
        if !self
            .conversation
            .needs_identity(self.config.identity_min_turns)
        {
            return Ok(());
        }
        let block = self.prompts.identity(&self.identity)?;
        if self.conversation.ensure_identity(
            &self.identity,
            &block,
            self.config.identity_min_turns,
        ) {
            info!("identity re-injected");
        }
        Ok(())
    }

    fn teammates(&self) -> Result<Vec<String>> {
        Ok(self
            .workspace
            .roster
            .member_names()?
            .into_iter()
            .filter(|name| *name != self.identity.name)
            .collect())
    }

    fn set_phase(&self, phase: AgentPhase) -> Result<()> {
        self.workspace
            .roster
            .set_status(&self.identity.name, phase.member_status())?;
        Ok(())
    }
}
