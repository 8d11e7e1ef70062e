//! Canonical `.crew/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{CrewConfig, write_config};
use super::roster::Roster;

/// All canonical paths within `.crew/` for a project root.
#[derive(Debug, Clone)]
pub struct CrewPaths {
    pub root: PathBuf,
    pub crew_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub team_dir: PathBuf,
    pub roster_path: PathBuf,
    pub inbox_dir: PathBuf,
    pub requests_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub worktree_index_path: PathBuf,
    pub events_path: PathBuf,
    pub locks_dir: PathBuf,
    pub decisions_dir: PathBuf,
}

impl CrewPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let crew_dir = root.join(".crew");
        let team_dir = crew_dir.join("team");
        let worktrees_dir = crew_dir.join("worktrees");
        Self {
            root: root.clone(),
            crew_dir: crew_dir.clone(),
            config_path: crew_dir.join("config.toml"),
            gitignore_path: crew_dir.join(".gitignore"),
            tasks_dir: crew_dir.join("tasks"),
            team_dir: team_dir.clone(),
            roster_path: team_dir.join("config.json"),
            inbox_dir: team_dir.join("inbox"),
            requests_dir: team_dir.join("requests"),
            worktrees_dir: worktrees_dir.clone(),
            worktree_index_path: worktrees_dir.join("index.json"),
            events_path: worktrees_dir.join("events.jsonl"),
            locks_dir: crew_dir.join("locks"),
            decisions_dir: crew_dir.join("decisions"),
        }
    }

    /// Lock file for a component-scoped resource, e.g. `("inbox", "alice")`.
    pub fn lock_path(&self, component: &str, key: &str) -> PathBuf {
        self.locks_dir.join(component).join(format!("{key}.lock"))
    }

    pub fn task_path(&self, id: u64) -> PathBuf {
        self.tasks_dir.join(format!("task_{id}.json"))
    }

    pub fn inbox_path(&self, agent: &str) -> PathBuf {
        self.inbox_dir.join(format!("{agent}.jsonl"))
    }

    pub fn request_path(&self, correlation_id: &str) -> PathBuf {
        self.requests_dir.join(format!("{correlation_id}.json"))
    }

    pub fn worktree_path(&self, name: &str) -> PathBuf {
        self.worktrees_dir.join(name)
    }
}

/// Options for `init_crew`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing config and roster.
    pub force: bool,
    /// Team name recorded in config and roster.
    pub team_name: Option<String>,
}

/// Create `.crew/` scaffolding in `root`.
///
/// Fails if `.crew/` already exists unless `options.force` is set. Task
/// records, inboxes and worktrees are never touched by a forced re-init.
pub fn init_crew(root: &Path, options: &InitOptions) -> Result<CrewPaths> {
    let paths = CrewPaths::new(root);
    if paths.crew_dir.exists() && !paths.crew_dir.is_dir() {
        return Err(anyhow!("crew init: .crew exists but is not a directory"));
    }
    if paths.crew_dir.exists() && !options.force {
        return Err(anyhow!(
            "crew init: .crew already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.crew_dir,
        &paths.tasks_dir,
        &paths.team_dir,
        &paths.inbox_dir,
        &paths.requests_dir,
        &paths.worktrees_dir,
        &paths.locks_dir,
    ] {
        create_dir(dir)?;
    }

    let mut config = CrewConfig::default();
    if let Some(team) = &options.team_name {
        config.team.team_name = team.clone();
    }
    write_config(&paths.config_path, &config)?;
    fs::write(&paths.gitignore_path, CREW_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    Roster::new(&paths, Default::default())
        .reset(&config.team.team_name)
        .context("write roster")?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const CREW_GITIGNORE: &str = "worktrees/\nlocks/\ndecisions/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    /// Verifies init_crew creates the directory structure, config and roster.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_crew(
            temp.path(),
            &InitOptions {
                force: false,
                team_name: Some("platform".to_string()),
            },
        )
        .expect("init");

        assert!(paths.tasks_dir.is_dir());
        assert!(paths.inbox_dir.is_dir());
        assert!(paths.requests_dir.is_dir());
        assert!(paths.worktrees_dir.is_dir());
        assert!(paths.roster_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            CREW_GITIGNORE
        );
        let cfg = load_config(&paths.config_path).expect("config");
        assert_eq!(cfg.team.team_name, "platform");
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_crew(temp.path(), &InitOptions::default()).expect("init");
        let err = init_crew(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn paths_are_stable() {
        let paths = CrewPaths::new("/repo");
        assert_eq!(paths.task_path(4), Path::new("/repo/.crew/tasks/task_4.json"));
        assert_eq!(
            paths.inbox_path("alice"),
            Path::new("/repo/.crew/team/inbox/alice.jsonl")
        );
        assert_eq!(
            paths.lock_path("inbox", "alice"),
            Path::new("/repo/.crew/locks/inbox/alice.lock")
        );
        assert_eq!(
            paths.worktree_path("w1"),
            Path::new("/repo/.crew/worktrees/w1")
        );
    }
}
