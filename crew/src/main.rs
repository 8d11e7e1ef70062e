//! `crew`: file-backed coordination for a team of autonomous agents.
//!
//! Every subcommand operates on `<root>/.crew/` (see `crew init`). Records are
//! printed as pretty JSON; failures exit with the codes in `crew::exit_codes`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crew::autonomy::{AutonomyLoop, ShutdownSignal};
use crew::core::state_update::TaskUpdate;
use crew::core::types::{MemberStatus, MessageKind, RequestKind, TaskStatus};
use crew::exit_codes;
use crew::io::decision::CommandDecisionMaker;
use crew::io::init::{InitOptions, init_crew};
use crew::team::{AgentSpec, run_team};
use crew::workspace::Workspace;

#[derive(Parser)]
#[command(
    name = "crew",
    version,
    about = "File-backed task, mailbox and worktree coordination for agent teams"
)]
struct Cli {
    /// Project root containing `.crew/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.crew/` with default config and an empty roster.
    Init {
        /// Overwrite existing config and roster.
        #[arg(short, long)]
        force: bool,
        #[arg(long)]
        team: Option<String>,
    },
    /// Shared task registry.
    #[command(subcommand)]
    Task(TaskCommand),
    /// Per-agent mailboxes.
    #[command(subcommand)]
    Inbox(InboxCommand),
    /// Isolated worktrees bound to tasks.
    #[command(subcommand)]
    Worktree(WorktreeCommand),
    /// Shutdown and plan-approval handshakes.
    #[command(subcommand)]
    Request(RequestCommand),
    /// Recent worktree and task lifecycle events.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Team roster and multi-agent runs.
    #[command(subcommand)]
    Team(TeamCommand),
    /// Single agent runs.
    #[command(subcommand)]
    Agent(AgentCommand),
}

#[derive(Subcommand)]
enum TaskCommand {
    Create {
        subject: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Get {
        id: u64,
    },
    List,
    Update {
        id: u64,
        #[arg(long, value_parser = parse_task_status)]
        status: Option<TaskStatus>,
        /// New owner; an empty string releases the task.
        #[arg(long)]
        owner: Option<String>,
        #[arg(long = "blocked-by")]
        blocked_by: Vec<u64>,
        #[arg(long)]
        blocks: Vec<u64>,
    },
    /// Atomically take a pending, unowned, unblocked task.
    Claim {
        id: u64,
        #[arg(long)]
        owner: String,
    },
    /// Claimable tasks in id order.
    Unclaimed,
}

#[derive(Subcommand)]
enum InboxCommand {
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        content: String,
    },
    /// Send to every roster member except the sender.
    Broadcast {
        #[arg(long)]
        from: String,
        content: String,
    },
    /// Read and clear an inbox.
    Read {
        agent: String,
    },
    /// Read an inbox without clearing it.
    Peek {
        agent: String,
    },
}

#[derive(Subcommand)]
enum WorktreeCommand {
    Create {
        name: String,
        #[arg(long)]
        task: Option<u64>,
        #[arg(long)]
        base_ref: Option<String>,
    },
    List,
    /// Run a shell command inside an active worktree.
    Run {
        name: String,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    Status {
        name: String,
    },
    Keep {
        name: String,
    },
    Remove {
        name: String,
        #[arg(long)]
        force: bool,
        /// Mark the bound task completed before unbinding it.
        #[arg(long)]
        complete_task: bool,
    },
}

#[derive(Subcommand)]
enum RequestCommand {
    /// Ask an agent to shut down.
    Shutdown {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Submit a plan for approval (to the team lead unless `--to` is given).
    Plan {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: Option<String>,
        plan: String,
    },
    Respond {
        correlation_id: String,
        #[command(flatten)]
        verdict: Verdict,
        #[arg(long)]
        feedback: Option<String>,
    },
    Get {
        correlation_id: String,
    },
    List {
        #[arg(long, value_parser = parse_request_kind)]
        kind: Option<RequestKind>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Verdict {
    #[arg(long)]
    approve: bool,
    #[arg(long)]
    reject: bool,
}

#[derive(Subcommand)]
enum TeamCommand {
    /// Add or update a roster member.
    Add {
        name: String,
        #[arg(long)]
        role: String,
    },
    List,
    /// Run several agents in one process until they all shut down.
    Run {
        /// `name:role`, repeatable.
        #[arg(long = "agent", required = true)]
        agents: Vec<String>,
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[derive(Subcommand)]
enum AgentCommand {
    Run {
        #[arg(long)]
        name: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        prompt: Option<String>,
    },
}

fn main() {
    crew::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<crew::Error>())
        .map_or(exit_codes::INVALID, |err| exit_codes::for_kind(err.kind()))
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, team } => cmd_init(&cli.root, force, team),
        Command::Task(cmd) => cmd_task(&Workspace::open(&cli.root)?, cmd),
        Command::Inbox(cmd) => cmd_inbox(&Workspace::open(&cli.root)?, cmd),
        Command::Worktree(cmd) => cmd_worktree(&Workspace::open(&cli.root)?, cmd),
        Command::Request(cmd) => cmd_request(&Workspace::open(&cli.root)?, cmd),
        Command::Events { limit } => {
            print_json(&Workspace::open(&cli.root)?.events.list_recent(limit)?)
        }
        Command::Team(cmd) => cmd_team(&Workspace::open(&cli.root)?, cmd),
        Command::Agent(cmd) => cmd_agent(&Workspace::open(&cli.root)?, cmd),
    }
}

fn cmd_init(root: &Path, force: bool, team_name: Option<String>) -> Result<()> {
    let paths = init_crew(root, &InitOptions { force, team_name })?;
    println!("initialized {}", paths.crew_dir.display());
    Ok(())
}

fn cmd_task(ws: &Workspace, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::Create {
            subject,
            description,
        } => print_json(&ws.tasks.create(&subject, &description)?),
        TaskCommand::Get { id } => print_json(&ws.tasks.get(id)?),
        TaskCommand::List => print_json(&ws.tasks.list()?),
        TaskCommand::Update {
            id,
            status,
            owner,
            blocked_by,
            blocks,
        } => {
            let update = TaskUpdate {
                status,
                owner,
                add_blocked_by: blocked_by,
                add_blocks: blocks,
            };
            if update.is_empty() {
                return Err(anyhow!("task update: nothing to change"));
            }
            print_json(&ws.tasks.update(id, &update)?)
        }
        TaskCommand::Claim { id, owner } => print_json(&ws.tasks.claim(id, &owner)?),
        TaskCommand::Unclaimed => print_json(&ws.tasks.scan_unclaimed()?),
    }
}

fn cmd_inbox(ws: &Workspace, cmd: InboxCommand) -> Result<()> {
    match cmd {
        InboxCommand::Send { from, to, content } => {
            print_json(&ws.mailbox.send(&from, &to, &content, MessageKind::Message, None)?)
        }
        InboxCommand::Broadcast { from, content } => {
            let members = ws.roster.member_names()?;
            let delivered = ws.mailbox.broadcast(&from, &content, &members)?;
            println!("delivered to {delivered} members");
            Ok(())
        }
        InboxCommand::Read { agent } => print_json(&ws.mailbox.read_inbox(&agent)?),
        InboxCommand::Peek { agent } => print_json(&ws.mailbox.peek(&agent)?),
    }
}

fn cmd_worktree(ws: &Workspace, cmd: WorktreeCommand) -> Result<()> {
    match cmd {
        WorktreeCommand::Create {
            name,
            task,
            base_ref,
        } => print_json(&ws.worktrees.create(&name, task, base_ref.as_deref())?),
        WorktreeCommand::List => print_json(&ws.worktrees.list()?),
        WorktreeCommand::Run { name, command } => {
            print_json(&ws.worktrees.run(&name, &command.join(" "))?)
        }
        WorktreeCommand::Status { name } => print_json(&ws.worktrees.status(&name)?),
        WorktreeCommand::Keep { name } => print_json(&ws.worktrees.keep(&name)?),
        WorktreeCommand::Remove {
            name,
            force,
            complete_task,
        } => print_json(&ws.worktrees.remove(&name, force, complete_task)?),
    }
}

fn cmd_request(ws: &Workspace, cmd: RequestCommand) -> Result<()> {
    match cmd {
        RequestCommand::Shutdown { from, to } => {
            let id = ws
                .correlator
                .initiate(&from, &to, RequestKind::Shutdown, None)?;
            println!("{id}");
            Ok(())
        }
        RequestCommand::Plan { from, to, plan } => {
            let target = to.unwrap_or_else(|| ws.config.team.lead.clone());
            let id = ws
                .correlator
                .initiate(&from, &target, RequestKind::Plan, Some(&plan))?;
            println!("{id}");
            Ok(())
        }
        RequestCommand::Respond {
            correlation_id,
            verdict,
            feedback,
        } => {
            let approve = verdict.approve && !verdict.reject;
            print_json(
                &ws.correlator
                    .respond(&correlation_id, approve, feedback.as_deref())?,
            )
        }
        RequestCommand::Get { correlation_id } => print_json(&ws.correlator.get(&correlation_id)?),
        RequestCommand::List { kind } => print_json(&ws.correlator.list(kind)?),
    }
}

fn cmd_team(ws: &Workspace, cmd: TeamCommand) -> Result<()> {
    match cmd {
        // Not running until `crew team run` or `crew agent run` starts it.
        TeamCommand::Add { name, role } => {
            print_json(&ws.roster.upsert(&name, &role, MemberStatus::Shutdown)?)
        }
        TeamCommand::List => print_json(&ws.roster.load()?),
        TeamCommand::Run { agents, prompt } => {
            let specs = agents
                .iter()
                .map(|raw| {
                    AgentSpec::parse(raw).map(|spec| AgentSpec {
                        prompt: prompt.clone(),
                        ..spec
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let signal = ShutdownSignal::new();
            let outcomes = run_team(ws, &specs, &signal, |spec| decider_for(ws, &spec.name))?;
            for outcome in outcomes {
                println!(
                    "{}: {:?} after {} activations",
                    outcome.name, outcome.reason, outcome.activations
                );
            }
            Ok(())
        }
    }
}

fn cmd_agent(ws: &Workspace, cmd: AgentCommand) -> Result<()> {
    match cmd {
        AgentCommand::Run { name, role, prompt } => {
            let decider = decider_for(ws, &name)?;
            let signal = ShutdownSignal::new();
            let mut agent = AutonomyLoop::new(ws, &decider, &signal, &name, &role)?;
            let outcome = agent.run(prompt.as_deref())?;
            println!(
                "{}: {:?} after {} activations",
                outcome.name, outcome.reason, outcome.activations
            );
            Ok(())
        }
    }
}

fn decider_for(ws: &Workspace, agent: &str) -> Result<CommandDecisionMaker> {
    CommandDecisionMaker::new(
        &ws.paths.root,
        &ws.paths.decisions_dir.join(agent),
        ws.config.decision.clone(),
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{payload}");
    Ok(())
}

fn parse_task_status(raw: &str) -> std::result::Result<TaskStatus, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("expected pending, in_progress or completed, got '{raw}'"))
}

fn parse_request_kind(raw: &str) -> std::result::Result<RequestKind, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("expected shutdown or plan, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["crew", "init", "--force", "--team", "core"]);
        assert!(matches!(cli.command, Command::Init { force: true, team: Some(ref t) } if t == "core"));
    }

    #[test]
    fn parse_task_update_flags() {
        let cli = Cli::parse_from([
            "crew",
            "task",
            "update",
            "3",
            "--status",
            "in_progress",
            "--blocked-by",
            "1",
            "--blocked-by",
            "2",
        ]);
        let Command::Task(TaskCommand::Update {
            id,
            status,
            blocked_by,
            ..
        }) = cli.command
        else {
            panic!("expected task update");
        };
        assert_eq!(id, 3);
        assert_eq!(status, Some(TaskStatus::InProgress));
        assert_eq!(blocked_by, vec![1, 2]);
    }

    #[test]
    fn respond_requires_a_verdict() {
        assert!(Cli::try_parse_from(["crew", "request", "respond", "abc"]).is_err());
        assert!(
            Cli::try_parse_from(["crew", "request", "respond", "abc", "--approve", "--reject"])
                .is_err()
        );
    }

    #[test]
    fn worktree_run_collects_trailing_command() {
        let cli = Cli::parse_from(["crew", "worktree", "run", "auth", "cargo", "test", "-q"]);
        let Command::Worktree(WorktreeCommand::Run { command, .. }) = cli.command else {
            panic!("expected worktree run");
        };
        assert_eq!(command.join(" "), "cargo test -q");
    }

    #[test]
    fn exit_code_follows_error_kind() {
        let err = anyhow::Error::new(crew::Error::TaskNotFound(9)).context("task get");
        assert_eq!(exit_code(&err), exit_codes::NOT_FOUND);
        assert_eq!(exit_code(&anyhow!("plain")), exit_codes::INVALID);
    }
}
