//! Host-wide single-flight lock
//!
//! Only one mutation or benchmark may run against the host at a time. The
//! in-process mutex covers concurrent calls within one agent; the lock file
//! covers separate processes. A lock file whose owner is no longer alive is
//! taken over.

use nettune_common::{NetTuneError, NetTuneResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

pub struct HostLock {
    inner: Mutex<()>,
    path: Option<PathBuf>,
}

/// Held for the duration of an operation; releases on drop
pub struct HostGuard<'a> {
    _inner: MutexGuard<'a, ()>,
    path: Option<PathBuf>,
}

impl Drop for HostGuard<'_> {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove lock file {}: {}", path.display(), e);
            }
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

impl HostLock {
    /// Lock with an optional lock file
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { inner: Mutex::new(()), path }
    }

    pub fn in_process() -> Self {
        Self::new(None)
    }

    /// Take the lock without waiting
    pub fn try_acquire(&self, purpose: &str) -> NetTuneResult<HostGuard<'_>> {
        let inner = self
            .inner
            .try_lock()
            .map_err(|_| {
                NetTuneError::Busy(format!(
                    "another operation is in progress ({} refused)",
                    purpose
                ))
            })?;

        let Some(path) = &self.path else {
            return Ok(HostGuard { _inner: inner, path: None });
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    tracing::debug!("Acquired host lock {} for {}", path.display(), purpose);
                    return Ok(HostGuard { _inner: inner, path: Some(path.clone()) });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = std::fs::read_to_string(path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    match owner {
                        Some(pid) if pid != std::process::id() && pid_alive(pid) => {
                            return Err(NetTuneError::Busy(format!(
                                "host locked by process {} ({} refused)",
                                pid, purpose
                            )));
                        }
                        _ => {
                            tracing::warn!("Removing stale lock file {}", path.display());
                            std::fs::remove_file(path)?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(NetTuneError::Busy(format!("could not take lock file {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process_exclusion() {
        let lock = HostLock::in_process();
        let guard = lock.try_acquire("apply").unwrap();
        assert!(matches!(lock.try_acquire("benchmark"), Err(NetTuneError::Busy(_))));
        drop(guard);
        assert!(lock.try_acquire("apply").is_ok());
    }

    #[test]
    fn test_lock_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apply.lock");
        let lock = HostLock::new(Some(path.clone()));
        {
            let _guard = lock.try_acquire("apply").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apply.lock");
        std::fs::write(&path, "999999999\n").unwrap();
        let lock = HostLock::new(Some(path));
        assert!(lock.try_acquire("apply").is_ok());
    }

    #[test]
    fn test_live_foreign_lock_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apply.lock");
        // pid 1 is always alive on Linux
        std::fs::write(&path, "1\n").unwrap();
        let lock = HostLock::new(Some(path));
        assert!(matches!(lock.try_acquire("apply"), Err(NetTuneError::Busy(_))));
    }
}
