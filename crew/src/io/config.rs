//! Crew configuration stored under `.crew/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Crew configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values used by the reference team setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CrewConfig {
    pub team: TeamConfig,
    pub agent: AgentConfig,
    pub lock: LockConfig,
    pub worktree: WorktreeConfig,
    pub decision: DecisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TeamConfig {
    /// Affiliation re-injected into every agent identity.
    pub team_name: String,
    /// Agent that receives plan requests by default.
    pub lead: String,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            team_name: "default".to_string(),
            lead: "lead".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Seconds between idle polls.
    pub poll_interval_secs: u64,
    /// Seconds of idle polling before an agent shuts itself down.
    pub idle_timeout_secs: u64,
    /// Decision rounds per activation before the agent is forced idle.
    pub max_rounds: u32,
    /// Transcripts at or below this many turns are treated as compacted.
    pub identity_min_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            idle_timeout_secs: 60,
            max_rounds: 50,
            identity_min_turns: 3,
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Advisory lock-file acquisition policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    pub retry_attempts: u32,
    /// Base backoff; attempt `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    /// Lock files without readable owner info are broken after this long.
    /// Locks whose owner process has exited are broken at once.
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 50,
            retry_delay_ms: 10,
            stale_after_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorktreeConfig {
    /// Git reference new worktree branches start from.
    pub base_ref: String,
    pub branch_prefix: String,
    pub command_timeout_secs: u64,
    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Commands containing any of these substrings are refused.
    pub blocked_commands: Vec<String>,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_ref: "HEAD".to_string(),
            branch_prefix: "wt/".to_string(),
            command_timeout_secs: 300,
            output_limit_bytes: 50_000,
            blocked_commands: ["rm -rf /", "sudo", "shutdown", "reboot", "> /dev/"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl WorktreeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// External decision-maker invocation.
///
/// `{schema}` and `{output}` in `command` are replaced with the decision
/// schema path and the path the command must write its JSON answer to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecisionConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl CrewConfig {
    pub fn validate(&self) -> Result<()> {
        if self.team.team_name.trim().is_empty() {
            return Err(anyhow!("team.team_name must not be empty"));
        }
        crate::core::names::validate_agent_name(&self.team.lead)
            .map_err(|err| anyhow!("team.lead: {err}"))?;
        if self.agent.poll_interval_secs == 0 {
            return Err(anyhow!("agent.poll_interval_secs must be > 0"));
        }
        if self.agent.idle_timeout_secs < self.agent.poll_interval_secs {
            return Err(anyhow!(
                "agent.idle_timeout_secs must be >= agent.poll_interval_secs"
            ));
        }
        if self.agent.max_rounds == 0 {
            return Err(anyhow!("agent.max_rounds must be > 0"));
        }
        if self.lock.retry_attempts == 0 {
            return Err(anyhow!("lock.retry_attempts must be > 0"));
        }
        if self.worktree.command_timeout_secs == 0 {
            return Err(anyhow!("worktree.command_timeout_secs must be > 0"));
        }
        if self.worktree.output_limit_bytes == 0 {
            return Err(anyhow!("worktree.output_limit_bytes must be > 0"));
        }
        if self.worktree.base_ref.trim().is_empty() {
            return Err(anyhow!("worktree.base_ref must not be empty"));
        }
        if self.decision.command.is_empty() || self.decision.command[0].trim().is_empty() {
            return Err(anyhow!("decision.command must be a non-empty array"));
        }
        if self.decision.timeout_secs == 0 {
            return Err(anyhow!("decision.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CrewConfig::default()`.
pub fn load_config(path: &Path) -> Result<CrewConfig> {
    if !path.exists() {
        let cfg = CrewConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CrewConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CrewConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CrewConfig::default());
        assert_eq!(cfg.agent.idle_timeout_secs / cfg.agent.poll_interval_secs, 12);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = CrewConfig::default();
        cfg.team.team_name = "platform".to_string();
        cfg.agent.poll_interval_secs = 2;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[agent]\nidle_timeout_secs = 30\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.agent.idle_timeout_secs, 30);
        assert_eq!(cfg.agent.poll_interval_secs, 5);
        assert_eq!(cfg.team, TeamConfig::default());
    }

    #[test]
    fn rejects_timeout_shorter_than_interval() {
        let mut cfg = CrewConfig::default();
        cfg.agent.idle_timeout_secs = 1;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("idle_timeout_secs"));
    }
}
