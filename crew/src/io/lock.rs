//! Advisory lock files guarding the smallest contended unit (one inbox, one
//! task registry, one worktree name, one protocol request).
//!
//! A lock is a file created with `create_new`; whoever creates it owns the
//! lock until the guard is dropped. Contention is retried with linear backoff
//! for a bounded number of attempts.
//!
//! A lock whose recorded owner process is no longer running is abandoned and
//! gets broken, however long a live owner has held it. A lock without readable
//! owner info is only broken once it is older than the stale threshold.
//! Breaking happens under a `<lock>.break` guard so two waiters never both
//! remove and re-create the same lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::io::config::LockConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockPolicy {
    fn from(cfg: &LockConfig) -> Self {
        Self {
            attempts: cfg.retry_attempts.max(1),
            delay: Duration::from_millis(cfg.retry_delay_ms),
            stale_after: Duration::from_secs(cfg.stale_after_secs),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: String,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Held lock; the lock file is removed on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(path: &Path, policy: &LockPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| Error::storage("create lock dir", parent, err))?;
        }
        for attempt in 0..policy.attempts {
            if let Some(lock) = Self::try_acquire(path)? {
                trace!(path = %path.display(), attempt, "lock acquired");
                return Ok(lock);
            }
            if break_if_abandoned(path, policy.stale_after)? {
                continue;
            }
            thread::sleep(policy.delay * (attempt + 1));
        }
        debug!(path = %path.display(), attempts = policy.attempts, "lock busy");
        Err(Error::LockBusy {
            path: path.to_path_buf(),
            attempts: policy.attempts,
        })
    }

    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == IoErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(Error::storage("create lock", path, err)),
        };
        let lock = Self {
            path: path.to_path_buf(),
        };
        // Owner info is what lets other processes tell a crashed holder from a
        // slow one, so a lock without it is not handed out.
        let line = serde_json::to_string(&LockInfo::current())
            .map_err(|err| Error::json(path, err))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| Error::storage("write lock owner", path, err))?;
        Ok(Some(lock))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != IoErrorKind::NotFound
        {
            warn!(path = %self.path.display(), err = %err, "failed to release lock");
        }
    }
}

/// Returns true when the lock is gone and acquisition should be retried at
/// once.
fn break_if_abandoned(path: &Path, stale_after: Duration) -> Result<bool> {
    let guard_path = breaker_path(path);
    let Some(_guard) = FileLock::try_acquire(&guard_path)? else {
        // Another waiter is judging this lock. A guard left by a crashed
        // breaker is cleared the same way as any abandoned lock.
        if is_abandoned(&guard_path, stale_after) {
            warn!(path = %guard_path.display(), "clearing abandoned lock breaker");
            remove_if_present(&guard_path)?;
        }
        return Ok(false);
    };
    if !path.exists() {
        return Ok(true);
    }
    if !is_abandoned(path, stale_after) {
        return Ok(false);
    }
    warn!(path = %path.display(), "breaking abandoned lock");
    remove_if_present(path)?;
    Ok(true)
}

fn breaker_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".break");
    path.with_file_name(name)
}

fn is_abandoned(path: &Path, stale_after: Duration) -> bool {
    let owner = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<LockInfo>(&raw).ok());
    match owner {
        Some(info) => !process_alive(info.pid),
        // Creator died between `create_new` and writing its owner info.
        None => {
            let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
                return false;
            };
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            age >= stale_after
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::storage("break lock", path, err)),
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id()
        || std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
}

#[cfg(windows)]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id()
        || std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .is_ok_and(|out| {
                let listing = String::from_utf8_lossy(&out.stdout);
                out.status.success() && listing.contains(&pid.to_string())
            })
}

#[cfg(not(any(unix, windows)))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_policy() -> LockPolicy {
        LockPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
            stale_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("locks/inbox.lock");

        let held = FileLock::acquire(&path, &quick_policy()).expect("first");
        let err = FileLock::acquire(&path, &quick_policy()).unwrap_err();
        assert!(matches!(err, Error::LockBusy { attempts: 3, .. }));

        drop(held);
        assert!(!path.exists());
        FileLock::acquire(&path, &quick_policy()).expect("after release");
    }

    #[test]
    fn stale_lock_is_broken() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stale.lock");
        fs::write(&path, "{}").expect("write stale lock");

        let policy = LockPolicy {
            stale_after: Duration::ZERO,
            ..quick_policy()
        };
        let lock = FileLock::acquire(&path, &policy).expect("break stale");
        assert_eq!(lock.path(), path.as_path());
    }

    fn write_owner(path: &Path, pid: u32) {
        let info = LockInfo {
            pid,
            acquired_at: Utc::now().to_rfc3339(),
        };
        fs::write(path, serde_json::to_string(&info).expect("owner")).expect("write lock");
    }

    #[test]
    fn live_owner_keeps_lock_past_stale_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("slow.lock");
        write_owner(&path, std::process::id());

        let policy = LockPolicy {
            stale_after: Duration::ZERO,
            ..quick_policy()
        };
        let err = FileLock::acquire(&path, &policy).unwrap_err();
        assert!(matches!(err, Error::LockBusy { .. }));
        assert!(path.exists());
    }

    #[test]
    fn waiters_breaking_one_dead_lock_take_turns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = Arc::new(temp.path().join("dead.lock"));
        write_owner(&path, i32::MAX as u32);
        let inside = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let policy = LockPolicy {
            attempts: 500,
            delay: Duration::from_millis(1),
            stale_after: Duration::from_secs(60),
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let inside = Arc::clone(&inside);
                let entered = Arc::clone(&entered);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let _lock = FileLock::acquire(&path, &policy).expect("acquire");
                    let now = inside.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(now, 0, "two holders at once");
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(entered.load(Ordering::SeqCst), 8);
        assert!(!path.exists());
        assert!(!breaker_path(&path).exists());
    }

    #[test]
    fn serializes_threads() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = Arc::new(temp.path().join("counter.lock"));
        let inside = Arc::new(AtomicUsize::new(0));
        let policy = LockPolicy {
            attempts: 200,
            delay: Duration::from_millis(1),
            stale_after: Duration::from_secs(60),
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    let _lock = FileLock::acquire(&path, &policy).expect("acquire");
                    let now = inside.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(now, 0, "two holders at once");
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
    }
}
