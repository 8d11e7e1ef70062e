//! Team roster (`.crew/team/config.json`): who is on the team and what each
//! member is doing right now.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::names::validate_agent_name;
use crate::core::types::MemberStatus;
use crate::error::{Error, Result};
use crate::io::init::CrewPaths;
use crate::io::json_file::{read_json_opt, write_json_atomic};
use crate::io::lock::{FileLock, LockPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Member {
    pub name: String,
    pub role: String,
    pub status: MemberStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamRoster {
    pub team_name: String,
    pub members: Vec<Member>,
}

impl Default for TeamRoster {
    fn default() -> Self {
        Self {
            team_name: "default".to_string(),
            members: Vec::new(),
        }
    }
}

impl TeamRoster {
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Roster {
    path: PathBuf,
    lock_path: PathBuf,
    policy: LockPolicy,
}

impl Roster {
    pub fn new(paths: &CrewPaths, policy: LockPolicy) -> Self {
        Self {
            path: paths.roster_path.clone(),
            lock_path: paths.lock_path("team", "roster"),
            policy,
        }
    }

    /// Current roster; a missing file reads as an empty default team.
    pub fn load(&self) -> Result<TeamRoster> {
        Ok(read_json_opt(&self.path)?.unwrap_or_default())
    }

    /// Replace the roster with an empty team.
    pub fn reset(&self, team_name: &str) -> Result<()> {
        let _lock = FileLock::acquire(&self.lock_path, &self.policy)?;
        write_json_atomic(
            &self.path,
            &TeamRoster {
                team_name: team_name.to_string(),
                members: Vec::new(),
            },
        )
    }

    /// Add a member or update the role/status of an existing one.
    #[instrument(skip_all, fields(name = %name, role = %role))]
    pub fn upsert(&self, name: &str, role: &str, status: MemberStatus) -> Result<Member> {
        validate_agent_name(name)?;
        self.modify(|roster| {
            let member = Member {
                name: name.to_string(),
                role: role.to_string(),
                status,
            };
            match roster.members.iter_mut().find(|m| m.name == name) {
                Some(existing) => *existing = member.clone(),
                None => roster.members.push(member.clone()),
            }
            Ok(member)
        })
    }

    pub fn set_status(&self, name: &str, status: MemberStatus) -> Result<()> {
        self.modify(|roster| {
            let member = roster
                .members
                .iter_mut()
                .find(|m| m.name == name)
                .ok_or_else(|| Error::AgentNotFound(name.to_string()))?;
            member.status = status;
            debug!(name, ?status, "member status");
            Ok(())
        })
    }

    pub fn member_names(&self) -> Result<Vec<String>> {
        Ok(self.load()?.members.into_iter().map(|m| m.name).collect())
    }

    fn modify<T>(&self, apply: impl FnOnce(&mut TeamRoster) -> Result<T>) -> Result<T> {
        let _lock = FileLock::acquire(&self.lock_path, &self.policy)?;
        let mut roster = self.load()?;
        let out = apply(&mut roster)?;
        write_json_atomic(&self.path, &roster)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_update_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let roster = Roster::new(&CrewPaths::new(temp.path()), LockPolicy::default());
        roster.reset("core").expect("reset");

        roster
            .upsert("alice", "coder", MemberStatus::Working)
            .expect("alice");
        roster
            .upsert("bob", "tester", MemberStatus::Working)
            .expect("bob");
        roster
            .set_status("alice", MemberStatus::Idle)
            .expect("status");

        let team = roster.load().expect("load");
        assert_eq!(team.team_name, "core");
        assert_eq!(team.member("alice").map(|m| m.status), Some(MemberStatus::Idle));
        assert_eq!(roster.member_names().expect("names"), vec!["alice", "bob"]);
    }

    #[test]
    fn unknown_member_status_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let roster = Roster::new(&CrewPaths::new(temp.path()), LockPolicy::default());
        let err = roster
            .set_status("ghost", MemberStatus::Shutdown)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
