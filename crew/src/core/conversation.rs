//! Agent working context: identity plus the running transcript.
//!
//! The transcript is owned by the autonomy loop and may be compacted by an
//! outside mechanism at any time. Compaction can drop the opening identity
//! block, so the loop checks [`Conversation::needs_identity`] before resuming.

use serde::{Deserialize, Serialize};

/// Who an agent is. Re-injected whenever the transcript loses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub role: String,
    pub team: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Tool,
            content: content.into(),
        }
    }
}

/// Marker opening every rendered identity block.
pub const IDENTITY_MARKER: &str = "<identity>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Replace the transcript with a single summary turn.
    pub fn compact(&mut self, summary: impl Into<String>) {
        self.turns = vec![Turn::user(summary)];
    }

    fn starts_with_identity(&self) -> bool {
        self.turns
            .first()
            .is_some_and(|turn| turn.content.trim_start().starts_with(IDENTITY_MARKER))
    }

    /// Heuristic for "this transcript was compacted": it is short and does not
    /// open with the identity block.
    pub fn needs_identity(&self, min_turns: usize) -> bool {
        self.turns.len() <= min_turns && !self.starts_with_identity()
    }

    /// Prepend `block` and an acknowledgement when [`Self::needs_identity`] holds.
    /// Returns true when the identity was re-injected.
    pub fn ensure_identity(&mut self, identity: &Identity, block: &str, min_turns: usize) -> bool {
        if !self.needs_identity(min_turns) {
            return false;
        }
        self.turns.insert(0, Turn::user(block));
        self.turns.insert(
            1,
            Turn::assistant(format!("I am {}. Continuing.", identity.name)),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            name: "alice".to_string(),
            role: "coder".to_string(),
            team: "core".to_string(),
        }
    }

    const BLOCK: &str = "<identity>You are 'alice', role: coder, team: core.</identity>";

    #[test]
    fn compacted_transcript_gets_identity_back() {
        let mut convo = Conversation::new();
        for i in 0..10 {
            convo.push(Turn::user(format!("turn {i}")));
        }
        assert!(!convo.needs_identity(3));

        convo.compact("summary of earlier work");
        assert!(convo.ensure_identity(&identity(), BLOCK, 3));
        assert_eq!(convo.len(), 3);
        assert!(convo.turns()[0].content.starts_with(IDENTITY_MARKER));
        assert_eq!(convo.turns()[1].content, "I am alice. Continuing.");
        assert_eq!(convo.turns()[2].content, "summary of earlier work");
    }

    #[test]
    fn identity_is_not_duplicated() {
        let mut convo = Conversation::new();
        assert!(convo.ensure_identity(&identity(), BLOCK, 3));
        assert!(!convo.ensure_identity(&identity(), BLOCK, 3));
        assert_eq!(convo.len(), 2);
    }
}
