//! Runs a team: one OS thread per agent, each with its own workspace handle
//! and decision-maker, sharing only the `.crew/` directory and a shutdown
//! signal.

use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, instrument};

use crate::autonomy::{AgentOutcome, AutonomyLoop, ShutdownSignal};
use crate::io::decision::DecisionMaker;
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: String,
    pub role: String,
    /// First instruction of the agent's first active phase.
    pub prompt: Option<String>,
}

impl AgentSpec {
    /// Parse `name:role`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, role) = raw
            .split_once(':')
            .ok_or_else(|| anyhow!("agent spec '{raw}' must look like name:role"))?;
        crate::core::names::validate_agent_name(name)?;
        if role.trim().is_empty() {
            return Err(anyhow!("agent spec '{raw}' has an empty role"));
        }
        Ok(Self {
            name: name.to_string(),
            role: role.to_string(),
            prompt: None,
        })
    }
}

/// Run every agent to completion and return outcomes in the order given.
///
/// `make_decider` is called once per agent on the spawning thread. A failed
/// agent does not stop the others; the first failure is returned after all
/// threads have joined.
#[instrument(skip_all, fields(agents = specs.len()))]
pub fn run_team<D, F>(
    workspace: &Workspace,
    specs: &[AgentSpec],
    signal: &ShutdownSignal,
    mut make_decider: F,
) -> Result<Vec<AgentOutcome>>
where
    D: DecisionMaker + Send + 'static,
    F: FnMut(&AgentSpec) -> Result<D>,
{
    let mut handles = Vec::with_capacity(specs.len());
    for spec in specs {
        let decider = make_decider(spec)?;
        let workspace = workspace.clone();
        let signal = signal.clone();
        let agent_name = spec.name.clone();
        let spec = spec.clone();
        let handle = thread::Builder::new()
            .name(agent_name.clone())
            .spawn(move || -> Result<AgentOutcome> {
                let mut agent =
                    AutonomyLoop::new(&workspace, &decider, &signal, &spec.name, &spec.role)?;
                agent.run(spec.prompt.as_deref())
            })
            .with_context(|| format!("spawn agent thread {agent_name}"))?;
        info!(agent = %agent_name, "agent spawned");
        handles.push((agent_name, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for (name, handle) in handles {
        match handle.join() {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(err)) => {
                error!(agent = %name, err = %format!("{err:#}"), "agent failed");
                first_error.get_or_insert(err.context(format!("agent {name}")));
            }
            Err(_) => {
                error!(agent = %name, "agent thread panicked");
                first_error.get_or_insert(anyhow!("agent {name} panicked"));
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(outcomes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::ShutdownReason;
    use crate::core::decision::{Action, Decision};
    use crate::core::types::MemberStatus;
    use crate::test_support::{ScriptedDecisionMaker, TestCrew};

    #[test]
    fn parses_name_and_role() {
        let spec = AgentSpec::parse("alice:coder").expect("spec");
        assert_eq!(spec.name, "alice");
        assert_eq!(spec.role, "coder");
        assert!(AgentSpec::parse("alice").is_err());
        assert!(AgentSpec::parse("../x:coder").is_err());
    }

    #[test]
    fn agents_run_until_signalled() {
        let mut config = crate::io::config::CrewConfig::default();
        config.agent.poll_interval_secs = 1;
        config.agent.idle_timeout_secs = 3600;
        let crew = TestCrew::with_config(config);
        crew.ws.tasks.create("one", "").expect("task");
        let signal = ShutdownSignal::new();
        let specs = vec![
            AgentSpec::parse("alice:coder").expect("alice"),
            AgentSpec::parse("bob:tester").expect("bob"),
        ];

        let waker = {
            let signal = signal.clone();
            let tasks = crew.ws.tasks.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    if tasks.get(1).is_ok_and(|t| !t.owner.is_empty()) {
                        break;
                    }
                    thread::sleep(std::time::Duration::from_millis(20));
                }
                signal.trigger();
            })
        };

        let outcomes = run_team(&crew.ws, &specs, &signal, |_| {
            Ok(ScriptedDecisionMaker::new(vec![Decision::Act {
                actions: vec![Action::Idle],
                note: String::new(),
            }]))
        })
        .expect("team");
        waker.join().expect("waker");

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.reason == ShutdownReason::Signalled));
        let claimed: Vec<u64> = outcomes.iter().flat_map(|o| o.auto_claimed.clone()).collect();
        assert_eq!(claimed, vec![1]);
        let roster = crew.ws.roster.load().expect("roster");
        assert!(roster.members.iter().all(|m| m.status == MemberStatus::Shutdown));
    }
}
