//! Single-instance advisory lock: one process at a time may own the
//! state database for a given account. Enforced by an exclusive lock
//! file at `<db_path>.lock` containing `{pid, instance_id,
//! started_at}`, held for the entire cycle run and released by a `Drop`
//! guard so an unwinding panic still releases it.
//!
//! A guard-object shape -- OS/atomic state wrapped behind a small owned
//! type with explicit lifecycle methods -- built fresh for this core,
//! since nothing upstream assumes one writer per account database.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub instance_id: String,
    pub started_at: i64,
}

#[derive(Debug)]
pub enum LockError {
    /// Someone else (or a previous crash that never cleaned up) holds
    /// the lock. Carries the holder info this process read, for
    /// logging. Maps to exit code `3`.
    Contended(LockHolder),
    Io(std::io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Contended(holder) => write!(
                f,
                "lock already held by pid={} instance={} started_at={}",
                holder.pid, holder.instance_id, holder.started_at
            ),
            LockError::Io(e) => write!(f, "lock file I/O error: {}", e),
        }
    }
}

impl std::error::Error for LockError {}

impl From<std::io::Error> for LockError {
    fn from(e: std::io::Error) -> Self {
        LockError::Io(e)
    }
}

/// Held for the lifetime of one process's run. Dropping it (including on
/// panic unwind, per `profile.release.panic = "unwind"` in the workspace
/// manifest) deletes the lock file.
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Acquire the lock at `<db_path>.lock`. Fails with `Contended` if a
    /// lock file already exists and was not left behind by a stale,
    /// no-longer-running process (best-effort liveness check via
    /// `pid`; a false positive only matters on the rare platform where
    /// PIDs are reused fast enough to alias, which a careful operator
    /// resolves with `force_unlock`).
    pub fn acquire(db_path: impl AsRef<Path>, instance_id: impl Into<String>, now: i64) -> Result<Self, LockError> {
        let path = lock_path(db_path.as_ref());

        if let Some(existing) = read_holder(&path)? {
            if process_is_alive(existing.pid) {
                return Err(LockError::Contended(existing));
            }
            warn!(
                stale_pid = existing.pid,
                stale_instance = %existing.instance_id,
                "removing stale lock file left by a process that is no longer running"
            );
            fs::remove_file(&path)?;
        }

        let holder = LockHolder { pid: process::id(), instance_id: instance_id.into(), started_at: now };
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(serde_json::to_string(&holder).unwrap().as_bytes())?;
        file.sync_all()?;

        info!(pid = holder.pid, instance = %holder.instance_id, path = %path.display(), "single-instance lock acquired");
        Ok(Self { path, released: false })
    }

    /// Release the lock early (normal shutdown path). Idempotent: a
    /// second call, or the subsequent `Drop`, is a no-op.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Force-remove a lock file whose holder is confirmed gone, bypassing
    /// the liveness check. Requires the caller to pass the documented
    /// `force_ack` token so an operator cannot fat-finger past a
    /// genuinely-live holder.
    pub fn force_unlock(db_path: impl AsRef<Path>, force_ack: &str) -> Result<(), LockError> {
        if force_ack != "I_UNDERSTAND" {
            return Err(LockError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "force_unlock requires force_ack == \"I_UNDERSTAND\"",
            )));
        }
        let path = lock_path(db_path.as_ref());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove lock file on release");
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(".lock");
    PathBuf::from(s)
}

fn read_holder(path: &Path) -> Result<Option<LockHolder>, LockError> {
    match File::open(path) {
        Ok(mut f) => {
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            Ok(serde_json::from_str(&buf).ok())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    // Signal 0 performs no actual signal delivery, only existence/
    // permission checks (kill(2)).
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    // Conservative: without a portable liveness check, assume alive so
    // a non-unix host never silently steals another process's lock.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_removes_the_lock_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.sqlite3");
        let lock = InstanceLock::acquire(&db_path, "inst-1", 1_000).unwrap();
        assert!(lock_path(&db_path).exists());
        lock.release();
        assert!(!lock_path(&db_path).exists());
    }

    #[test]
    fn second_acquire_by_live_process_is_contended() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.sqlite3");
        let _lock = InstanceLock::acquire(&db_path, "inst-1", 1_000).unwrap();

        let second = InstanceLock::acquire(&db_path, "inst-2", 2_000);
        assert!(matches!(second, Err(LockError::Contended(_))));
    }

    #[test]
    fn stale_lock_from_a_dead_pid_is_recovered() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.sqlite3");
        let path = lock_path(&db_path);
        // A pid vanishingly unlikely to be alive in this test's process
        // tree, simulating a crash that left the lock file behind.
        let stale = LockHolder { pid: 999_999, instance_id: "dead".into(), started_at: 1 };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = InstanceLock::acquire(&db_path, "inst-2", 2_000).unwrap();
        lock.release();
    }

    #[test]
    fn force_unlock_requires_exact_ack_token() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.sqlite3");
        let _lock = InstanceLock::acquire(&db_path, "inst-1", 1_000).unwrap();

        assert!(InstanceLock::force_unlock(&db_path, "nope").is_err());
        assert!(InstanceLock::force_unlock(&db_path, "I_UNDERSTAND").is_ok());
        assert!(!lock_path(&db_path).exists());
    }
}
