// src/daemon/status.rs
// Persisted daemon state: the status snapshot rewritten each loop and the
// pid file that enforces at-most-one daemon per user.

use crate::error::StorageError;
use crate::{DevlogError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Per-project counters, restored across daemon restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectStats {
    pub events_processed: u64,
    pub memories_extracted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Snapshot written to `<global_dir>/daemon.status` at the end of each loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub sessions_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_consolidation: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_staleness_check: Option<DateTime<Utc>>,
    pub projects: BTreeMap<PathBuf, ProjectStats>,
}

impl DaemonStatus {
    pub fn read(path: &Path) -> Option<DaemonStatus> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unparsable daemon status");
                None
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::write(path, e))?;
        }
        let tmp = path.with_extension("status.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DevlogError::from(StorageError::write(path, e)))?;
        std::fs::write(&tmp, json).map_err(|e| StorageError::write(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| StorageError::write(path, e))?;
        Ok(())
    }
}

/// Check whether a pid belongs to a live process (signal 0 probe).
/// EPERM still means the process exists, just owned by someone else.
fn is_pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs no action, only validity checks
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Claim the pid file, refusing when another live daemon owns it.
/// A stale pid from a crashed daemon is overwritten.
pub fn acquire_pid_file(path: &Path) -> Result<()> {
    if let Ok(contents) = std::fs::read_to_string(path)
        && let Ok(existing) = contents.trim().parse::<u32>()
        && existing != std::process::id()
        && is_pid_alive(existing)
    {
        return Err(DevlogError::Config(format!(
            "daemon already running with pid {existing}"
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::write(path, e))?;
    }
    std::fs::write(path, std::process::id().to_string())
        .map_err(|e| StorageError::write(path, e))?;
    Ok(())
}

/// Drop the pid file on shutdown.
pub fn release_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_status() -> DaemonStatus {
        let mut projects = BTreeMap::new();
        projects.insert(
            PathBuf::from("/work/acme"),
            ProjectStats {
                events_processed: 3,
                memories_extracted: 1,
                last_activity: Some(Utc::now()),
            },
        );
        DaemonStatus {
            running: true,
            pid: std::process::id(),
            started_at: Utc::now(),
            sessions_processed: 1,
            last_consolidation: None,
            last_staleness_check: None,
            projects,
        }
    }

    #[test]
    fn test_status_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.status");
        let status = sample_status();
        status.write(&path).unwrap();

        let read = DaemonStatus::read(&path).unwrap();
        assert!(read.running);
        assert_eq!(read.sessions_processed, 1);
        assert_eq!(read.projects.len(), 1);
        assert_eq!(
            read.projects[&PathBuf::from("/work/acme")].events_processed,
            3
        );
    }

    #[test]
    fn test_status_read_missing_or_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.status");
        assert!(DaemonStatus::read(&path).is_none());

        std::fs::write(&path, "{oops").unwrap();
        assert!(DaemonStatus::read(&path).is_none());
    }

    #[test]
    fn test_pid_file_refuses_live_owner() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");

        // Claim as ourselves, then claim again: our own pid never blocks
        acquire_pid_file(&path).unwrap();
        acquire_pid_file(&path).unwrap();

        // A pid that is certainly alive and not us: pid 1
        std::fs::write(&path, "1").unwrap();
        assert!(acquire_pid_file(&path).is_err());
    }

    #[test]
    fn test_pid_file_overwrites_stale_owner() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");
        // Max pid on Linux is bounded well below this; treat as dead
        std::fs::write(&path, "999999999").unwrap();
        acquire_pid_file(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn test_release_pid_file_is_quiet_when_missing() {
        let tmp = TempDir::new().unwrap();
        release_pid_file(&tmp.path().join("daemon.pid"));
    }
}
