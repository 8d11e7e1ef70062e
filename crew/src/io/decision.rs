//! Decision-maker abstraction for the autonomy loop.
//!
//! The [`DecisionMaker`] trait decouples the loop from the model backend.
//! [`CommandDecisionMaker`] renders a prompt, runs a configured command (by
//! default `codex exec`) that writes its answer to a file, validates the JSON
//! against the embedded decision schema and parses it. Tests use scripted
//! decision-makers that return predetermined decisions.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::conversation::{Conversation, Identity};
use crate::core::decision::Decision;
use crate::io::config::DecisionConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::Prompts;

pub const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

/// Everything a decision-maker sees for one round.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub identity: &'a Identity,
    pub teammates: &'a [String],
    pub conversation: &'a Conversation,
    /// 1-based round within the current active phase.
    pub round: u32,
}

/// Abstraction over the model that drives an agent.
pub trait DecisionMaker {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision>;
}

/// Decision-maker that runs an external command per round.
pub struct CommandDecisionMaker {
    workdir: PathBuf,
    state_dir: PathBuf,
    config: DecisionConfig,
    prompts: Prompts,
}

impl CommandDecisionMaker {
    /// `state_dir` receives the schema, the prompt and the raw answer of the
    /// latest round, which is handy when a decision fails to parse.
    pub fn new(workdir: &Path, state_dir: &Path, config: DecisionConfig) -> Result<Self> {
        Ok(Self {
            workdir: workdir.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            config,
            prompts: Prompts::new()?,
        })
    }

    fn schema_path(&self) -> PathBuf {
        self.state_dir.join("decision.schema.json")
    }

    fn output_path(&self) -> PathBuf {
        self.state_dir.join("decision.json")
    }

    fn build_command(&self) -> Result<Command> {
        let schema = self.schema_path();
        let output = self.output_path();
        let args: Vec<String> = self
            .config
            .command
            .iter()
            .map(|arg| {
                arg.replace("{schema}", &schema.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect();
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("decision.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.workdir);
        Ok(cmd)
    }
}

impl DecisionMaker for CommandDecisionMaker {
    #[instrument(skip_all, fields(agent = %request.identity.name, round = request.round))]
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision> {
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("create {}", self.state_dir.display()))?;
        write_if_changed(&self.schema_path(), DECISION_SCHEMA)?;
        let output_path = self.output_path();
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale {}", output_path.display()))?;
        }

        let prompt = self.prompts.decision(
            request.identity,
            request.teammates,
            request.conversation,
            request.round,
        )?;
        fs::write(self.state_dir.join("prompt.md"), &prompt).context("write prompt")?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        info!("asking decision command");
        let output = run_command_with_timeout(
            self.build_command()?,
            Some(prompt.as_bytes()),
            timeout,
            self.config.output_limit_bytes,
        )
        .context("run decision command")?;
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "decision command timed out");
            return Err(anyhow!("decision command timed out after {timeout:?}"));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "decision command failed");
            return Err(anyhow!(
                "decision command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let raw = fs::read_to_string(&output_path)
            .with_context(|| format!("read decision {}", output_path.display()))?;
        let decision = parse_decision(&raw)?;
        debug!(?decision, "decision parsed");
        Ok(decision)
    }
}

/// Validate `raw` against the decision schema, then parse it.
pub fn parse_decision(raw: &str) -> Result<Decision> {
    let value: Value = serde_json::from_str(raw).context("parse decision json")?;
    let schema: Value = serde_json::from_str(DECISION_SCHEMA).context("parse decision schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    if !validator.is_valid(&value) {
        let messages = validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "decision schema validation failed: {}",
            messages.join("; ")
        ));
    }
    serde_json::from_value(value).context("decode decision")
}

fn write_if_changed(path: &Path, contents: &str) -> Result<()> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
        return Ok(());
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
