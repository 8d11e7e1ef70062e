//! Validation for names that end up as file or branch names.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static AGENT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,64}$").expect("agent name regex"));
static WORKTREE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,40}$").expect("worktree name regex"));

/// Agent names key inbox files, so they must be plain path components.
pub fn validate_agent_name(name: &str) -> Result<()> {
    validate(name, &AGENT_NAME_RE, "agent name", 64)
}

/// Worktree names become both a directory and part of a branch name.
pub fn validate_worktree_name(name: &str) -> Result<()> {
    validate(name, &WORKTREE_NAME_RE, "worktree name", 40)
}

fn validate(name: &str, re: &Regex, what: &str, max: usize) -> Result<()> {
    if name == "." || name == ".." || !re.is_match(name) {
        return Err(Error::invalid(format!(
            "invalid {what} '{name}': use 1-{max} characters from letters, digits, '.', '_' and '-'"
        )));
    }
    Ok(())
}

/// Return the first configured pattern contained in `command`, if any.
pub fn blocked_pattern<'a>(command: &str, blocked: &'a [String]) -> Option<&'a str> {
    blocked
        .iter()
        .map(String::as_str)
        .find(|pattern| !pattern.is_empty() && command.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        validate_agent_name("alice").expect("alice");
        validate_agent_name("build-bot_2.1").expect("dotted");
        validate_worktree_name("auth-refactor").expect("worktree");
    }

    #[test]
    fn rejects_path_like_names() {
        for name in ["", ".", "..", "a/b", "../etc", "with space"] {
            assert!(validate_agent_name(name).is_err(), "{name:?} should fail");
        }
        let long = "x".repeat(41);
        assert!(validate_worktree_name(&long).is_err());
    }

    #[test]
    fn finds_blocked_patterns() {
        let blocked = vec!["rm -rf /".to_string(), "sudo".to_string()];
        assert_eq!(blocked_pattern("sudo make install", &blocked), Some("sudo"));
        assert_eq!(blocked_pattern("cargo test", &blocked), None);
    }
}
