//! The shared, file-backed stores of one `.crew/` directory, wired together.
//!
//! Every agent thread and every CLI invocation opens its own `Workspace`; the
//! stores hold no in-memory state beyond paths and policy, so clones are cheap
//! and any number of them may operate on the same directory concurrently.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use crate::io::config::{CrewConfig, load_config};
use crate::io::events::EventLog;
use crate::io::init::CrewPaths;
use crate::io::lock::LockPolicy;
use crate::io::mailbox::Mailbox;
use crate::io::protocol::Correlator;
use crate::io::roster::Roster;
use crate::io::task_store::TaskStore;
use crate::io::vcs::{GitBackend, VcsBackend};
use crate::io::worktree::WorktreeRegistry;

#[derive(Clone)]
pub struct Workspace {
    pub paths: CrewPaths,
    pub config: CrewConfig,
    pub tasks: TaskStore,
    pub mailbox: Mailbox,
    pub worktrees: WorktreeRegistry,
    pub correlator: Correlator,
    pub events: EventLog,
    pub roster: Roster,
}

impl Workspace {
    /// Open an initialized `.crew/` under `root`, using git for worktrees.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = CrewPaths::new(root);
        if !paths.crew_dir.is_dir() {
            return Err(anyhow!(
                "{} is not initialized (run `crew init` first)",
                root.display()
            ));
        }
        let config = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;
        let vcs = Arc::new(GitBackend::new(&paths.root));
        Ok(Self::with_vcs(paths, config, vcs))
    }

    pub fn with_vcs(paths: CrewPaths, config: CrewConfig, vcs: Arc<dyn VcsBackend>) -> Self {
        let policy = LockPolicy::from(&config.lock);
        let events = EventLog::new(&paths, policy);
        let tasks = TaskStore::new(&paths, policy).with_events(events.clone());
        let mailbox = Mailbox::new(&paths, policy);
        let worktrees = WorktreeRegistry::new(
            &paths,
            policy,
            config.worktree.clone(),
            vcs,
            tasks.clone(),
            events.clone(),
        );
        let correlator = Correlator::new(&paths, policy, mailbox.clone());
        let roster = Roster::new(&paths, policy);
        Self {
            paths,
            config,
            tasks,
            mailbox,
            worktrees,
            correlator,
            events,
            roster,
        }
    }
}
