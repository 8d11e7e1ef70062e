//! Stable exit codes for `crew` commands, derived from [`ErrorKind`].

use crate::error::ErrorKind;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, layout or config, or any error without a more specific code.
pub const INVALID: i32 = 1;
/// Unknown task, worktree, agent or correlation id.
pub const NOT_FOUND: i32 = 2;
/// Lost claim race, duplicate response, name or binding collision, busy lock.
pub const CONFLICT: i32 = 3;
/// Reading or writing `.crew/` state failed.
pub const STORAGE: i32 = 4;
/// git or another external command failed.
pub const EXTERNAL: i32 = 5;
/// A command inside a worktree ran past its timeout.
pub const TIMEOUT: i32 = 6;

pub fn for_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NotFound => NOT_FOUND,
        ErrorKind::Conflict => CONFLICT,
        ErrorKind::Timeout => TIMEOUT,
        ErrorKind::Storage => STORAGE,
        ErrorKind::External => EXTERNAL,
        ErrorKind::Invalid => INVALID,
    }
}
