// src/lock.rs
// Per-project async lock serializing all mutating operations for a project.
// Per-process only; crash consistency comes from atomic file renames in the
// stores, not from this lock.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;

/// One entry per project with queued or running work. `holders` counts every
/// task that has registered interest and not yet finished; the entry is
/// removed when it drops to zero.
struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    holders: usize,
}

static LOCKS: LazyLock<StdMutex<HashMap<PathBuf, LockEntry>>> =
    LazyLock::new(|| StdMutex::new(HashMap::new()));

/// Decrements the holder count on drop, so the registry shrinks even when
/// the guarded future errors or panics.
struct HolderGuard {
    project: PathBuf,
}

impl Drop for HolderGuard {
    fn drop(&mut self) {
        let mut map = LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = map.get_mut(&self.project) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                map.remove(&self.project);
            }
        }
    }
}

fn register(project: &Path) -> (Arc<AsyncMutex<()>>, HolderGuard) {
    let mut map = LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let entry = map.entry(project.to_path_buf()).or_insert_with(|| LockEntry {
        lock: Arc::new(AsyncMutex::new(())),
        holders: 0,
    });
    entry.holders += 1;
    (
        entry.lock.clone(),
        HolderGuard {
            project: project.to_path_buf(),
        },
    )
}

/// Run `work` while holding the lock for `project`.
///
/// Calls for the same project run strictly one after another (the tokio
/// mutex hands the lock to waiters in FIFO order); calls for distinct
/// projects proceed concurrently. The lock is released whatever `work`
/// returns.
pub async fn with_project_lock<F, Fut, T>(project: &Path, work: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let (lock, _holder) = register(project);
    let _guard = lock.lock().await;
    work().await
}
