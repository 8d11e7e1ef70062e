//! Prompt rendering for the autonomy loop and the command decision-maker.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::conversation::{Conversation, Identity};
use crate::core::task::Task;
use crate::io::mailbox::Message;

const IDENTITY_TEMPLATE: &str = include_str!("prompts/identity.md");
const AUTO_CLAIMED_TEMPLATE: &str = include_str!("prompts/auto_claimed.md");
const INBOX_TEMPLATE: &str = include_str!("prompts/inbox.md");
const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");

/// Template engine wrapper around minijinja.
pub struct Prompts {
    env: Environment<'static>,
}

impl Prompts {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("identity", IDENTITY_TEMPLATE),
            ("auto_claimed", AUTO_CLAIMED_TEMPLATE),
            ("inbox", INBOX_TEMPLATE),
            ("decision", DECISION_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    /// Opening block of every transcript; starts with `IDENTITY_MARKER`.
    pub fn identity(&self, identity: &Identity) -> Result<String> {
        let rendered = self.env.get_template("identity")?.render(context! {
            name => &identity.name,
            role => &identity.role,
            team => &identity.team,
        })?;
        Ok(rendered)
    }

    pub fn auto_claimed(&self, task: &Task) -> Result<String> {
        let rendered = self
            .env
            .get_template("auto_claimed")?
            .render(context! { task => task })?;
        Ok(rendered)
    }

    pub fn inbox(&self, messages: &[Message]) -> Result<String> {
        let rendered = self
            .env
            .get_template("inbox")?
            .render(context! { messages => messages })?;
        Ok(rendered)
    }

    pub fn decision(
        &self,
        identity: &Identity,
        teammates: &[String],
        conversation: &Conversation,
        round: u32,
    ) -> Result<String> {
        let rendered = self.env.get_template("decision")?.render(context! {
            identity => identity,
            teammates => teammates,
            turns => conversation.turns(),
            round => round,
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::{IDENTITY_MARKER, Turn};
    use crate::core::types::MessageKind;
    use chrono::Utc;

    fn identity() -> Identity {
        Identity {
            name: "alice".to_string(),
            role: "coder".to_string(),
            team: "core".to_string(),
        }
    }

    #[test]
    fn identity_block_opens_with_marker() {
        let prompts = Prompts::new().expect("prompts");
        let block = prompts.identity(&identity()).expect("render");
        assert!(block.starts_with(IDENTITY_MARKER));
        assert!(block.contains("You are 'alice', role: coder, team: core."));
    }

    #[test]
    fn auto_claimed_names_task() {
        let prompts = Prompts::new().expect("prompts");
        let task = Task::new(4, "Fix login", "token expiry", Utc::now());
        let text = prompts.auto_claimed(&task).expect("render");
        assert!(text.starts_with("<auto-claimed>Task #4: Fix login\ntoken expiry"));
        assert!(text.ends_with("</auto-claimed>"));
    }

    #[test]
    fn inbox_lists_each_message() {
        let prompts = Prompts::new().expect("prompts");
        let messages = vec![
            Message::new(MessageKind::Message, "lead", "alice", "check CI"),
            Message::new(MessageKind::ShutdownRequest, "lead", "alice", "wrap up")
                .with_correlation_id("abc"),
        ];
        let text = prompts.inbox(&messages).expect("render");
        assert!(text.contains("[message] from lead: check CI"));
        assert!(text.contains("[shutdown_request abc] from lead: wrap up"));
    }

    #[test]
    fn decision_prompt_includes_transcript() {
        let prompts = Prompts::new().expect("prompts");
        let mut conversation = Conversation::new();
        conversation.push(Turn::user("start on task 1"));
        let text = prompts
            .decision(&identity(), &["bob".to_string()], &conversation, 2)
            .expect("render");
        assert!(text.contains("Teammates: bob."));
        assert!(text.contains("Round 2."));
        assert!(text.contains("start on task 1"));
    }
}
