//! Per-agent append-only inboxes (`.crew/team/inbox/<agent>.jsonl`).
//!
//! Sends append one line under the recipient's inbox lock. Reading drains the
//! inbox under the same lock, so a message is delivered to exactly one read.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::names::validate_agent_name;
use crate::core::types::MessageKind;
use crate::error::{Error, Result};
use crate::io::init::CrewPaths;
use crate::io::json_file::{append_json_line, read_lines};
use crate::io::lock::{FileLock, LockPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Decision carried by protocol responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageKind, from: &str, to: &str, content: &str) -> Self {
        Self {
            kind,
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            correlation_id: None,
            approve: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_approve(mut self, approve: bool) -> Self {
        self.approve = Some(approve);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    paths: CrewPaths,
    policy: LockPolicy,
}

impl Mailbox {
    pub fn new(paths: &CrewPaths, policy: LockPolicy) -> Self {
        Self {
            paths: paths.clone(),
            policy,
        }
    }

    /// Append a plain message of `kind` to `recipient`'s inbox.
    pub fn send(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        kind: MessageKind,
        correlation_id: Option<&str>,
    ) -> Result<Message> {
        let mut message = Message::new(kind, sender, recipient, content);
        message.correlation_id = correlation_id.map(str::to_string);
        self.deliver(&message)?;
        Ok(message)
    }

    /// Append a fully built message to the inbox named by `message.to`.
    #[instrument(skip_all, fields(from = %message.from, to = %message.to, kind = %message.kind))]
    pub fn deliver(&self, message: &Message) -> Result<()> {
        validate_agent_name(&message.from)?;
        validate_agent_name(&message.to)?;
        let _lock = self.lock(&message.to)?;
        append_json_line(&self.paths.inbox_path(&message.to), message)?;
        debug!("message delivered");
        Ok(())
    }

    /// Send a broadcast to every recipient except the sender. Each delivery is
    /// durable on its own; a failure stops the fan-out and is returned.
    pub fn broadcast(&self, sender: &str, content: &str, recipients: &[String]) -> Result<usize> {
        let mut delivered = 0;
        for recipient in recipients.iter().filter(|r| r.as_str() != sender) {
            self.send(sender, recipient, content, MessageKind::Broadcast, None)?;
            delivered += 1;
        }
        debug!(sender, delivered, "broadcast sent");
        Ok(delivered)
    }

    /// Drain `agent`'s inbox. A missing inbox reads as empty.
    #[instrument(skip_all, fields(agent = %agent))]
    pub fn read_inbox(&self, agent: &str) -> Result<Vec<Message>> {
        validate_agent_name(agent)?;
        let path = self.inbox_path(agent);
        let _lock = self.lock(agent)?;
        let contents = read_lines(&path)?;
        if contents.is_empty() {
            return Ok(Vec::new());
        }
        match fs::write(&path, "") {
            Ok(()) => {}
            Err(err) if err.kind() == IoErrorKind::NotFound => {}
            Err(err) => return Err(Error::storage("clear inbox", &path, err)),
        }
        let messages = parse_messages(&contents);
        debug!(count = messages.len(), "inbox drained");
        Ok(messages)
    }

    /// Read without clearing.
    pub fn peek(&self, agent: &str) -> Result<Vec<Message>> {
        validate_agent_name(agent)?;
        Ok(parse_messages(&read_lines(&self.inbox_path(agent))?))
    }

    fn inbox_path(&self, agent: &str) -> PathBuf {
        self.paths.inbox_path(agent)
    }

    fn lock(&self, agent: &str) -> Result<FileLock> {
        FileLock::acquire(&self.paths.lock_path("inbox", agent), &self.policy)
    }
}

fn parse_messages(contents: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(message) => messages.push(message),
            Err(err) => warn!(line = index + 1, err = %err, "skipping malformed inbox line"),
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox() -> (tempfile::TempDir, Mailbox) {
        let temp = tempfile::tempdir().expect("tempdir");
        let mailbox = Mailbox::new(&CrewPaths::new(temp.path()), LockPolicy::default());
        (temp, mailbox)
    }

    #[test]
    fn read_drains_and_second_read_is_empty() {
        let (_temp, mailbox) = mailbox();
        mailbox
            .send("lead", "alice", "hi", MessageKind::Message, None)
            .expect("send 1");
        mailbox
            .send("bob", "alice", "yo", MessageKind::Message, None)
            .expect("send 2");

        let first = mailbox.read_inbox("alice").expect("read");
        assert_eq!(
            first.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["hi", "yo"]
        );
        assert!(mailbox.read_inbox("alice").expect("second").is_empty());
        assert!(mailbox.read_inbox("nobody").expect("missing").is_empty());
    }

    #[test]
    fn broadcast_skips_sender() {
        let (_temp, mailbox) = mailbox();
        let team = vec!["lead".to_string(), "alice".to_string(), "bob".to_string()];
        let delivered = mailbox.broadcast("lead", "standup", &team).expect("broadcast");
        assert_eq!(delivered, 2);
        assert!(mailbox.peek("lead").expect("lead").is_empty());
        let bob = mailbox.peek("bob").expect("bob");
        assert_eq!(bob[0].kind, MessageKind::Broadcast);
        assert_eq!(mailbox.peek("bob").expect("peek again").len(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (temp, mailbox) = mailbox();
        mailbox
            .send("lead", "alice", "ok", MessageKind::Message, Some("c-1"))
            .expect("send");
        let path = CrewPaths::new(temp.path()).inbox_path("alice");
        let mut contents = fs::read_to_string(&path).expect("read");
        contents.push_str("{\"type\":\"message\",\"extra\":1}\n");
        fs::write(&path, contents).expect("write");

        let messages = mailbox.read_inbox("alice").expect("read");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn rejects_path_like_agent_names() {
        let (_temp, mailbox) = mailbox();
        let err = mailbox
            .send("lead", "../etc", "x", MessageKind::Message, None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }
}
