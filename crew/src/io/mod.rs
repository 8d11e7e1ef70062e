//! Side-effecting stores and collaborators: `.crew/` records, lock files,
//! git worktrees, child processes and prompt rendering.

pub mod config;
pub mod decision;
pub mod events;
pub mod git;
pub mod init;
pub mod json_file;
pub mod lock;
pub mod mailbox;
pub mod process;
pub mod prompt;
pub mod protocol;
pub mod roster;
pub mod task_store;
pub mod vcs;
pub mod worktree;
