//! File-backed coordination substrate for a team of autonomous agents.
//!
//! Agents share no memory. They cooperate through records under `.crew/`: a
//! task graph with atomic claims, per-agent mailboxes, isolated worktrees
//! bound to tasks, and correlated request/response handshakes. The crate is
//! split the usual way:
//!
//! - **[`core`]**: Pure, deterministic logic (task graph updates, invariants,
//!   claim selection, decisions, transcripts). No I/O.
//! - **[`io`]**: Side-effecting stores (files, locks, git, child processes).
//!
//! Orchestration modules ([`workspace`], [`dispatch`], [`autonomy`], [`team`])
//! wire the stores together and drive agents.

pub mod autonomy;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod team;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
