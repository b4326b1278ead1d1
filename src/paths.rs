// src/paths.rs
// Path resolution for the global home and per-project memory roots.
// No other module constructs these paths directly.

use crate::error::StorageError;
use crate::{DevlogError, Result};
use std::path::{Path, PathBuf};

/// Global devlog home: `$DEVLOG_HOME` when set, else `~/.devlog`.
pub fn global_dir() -> PathBuf {
    if let Ok(custom) = std::env::var("DEVLOG_HOME")
        && !custom.trim().is_empty()
    {
        return PathBuf::from(custom);
    }
    dirs::home_dir()
        .unwrap_or_else(|| {
            tracing::warn!(
                "HOME directory not set — using current directory for devlog data. Consider setting $HOME or $DEVLOG_HOME."
            );
            PathBuf::from(".")
        })
        .join(".devlog")
}

/// `<global_dir>/config.json`
pub fn global_config_file() -> PathBuf {
    global_dir().join("config.json")
}

/// `<global_dir>/daemon.pid`
pub fn daemon_pid_file() -> PathBuf {
    global_dir().join("daemon.pid")
}

/// `<global_dir>/daemon.status`
pub fn daemon_status_file() -> PathBuf {
    global_dir().join("daemon.status")
}

/// `<global_dir>/pending-projects.json`
pub fn pending_projects_file() -> PathBuf {
    global_dir().join("pending-projects.json")
}

/// Marker file owned by the Consolidator while the extraction LLM runs.
/// Hooks skip ingestion while it exists, breaking the self-feedback loop.
pub fn extraction_marker_file() -> PathBuf {
    global_dir().join("tmp").join("extraction-in-progress")
}

/// Per-project memory root: `<project>/.memory`
pub fn memory_root(project_path: &Path) -> PathBuf {
    project_path.join(".memory")
}

/// `<project>/.memory/knowledge`
pub fn knowledge_dir(project_path: &Path) -> PathBuf {
    memory_root(project_path).join("knowledge")
}

/// `<project>/.memory/working`
pub fn working_dir(project_path: &Path) -> PathBuf {
    memory_root(project_path).join("working")
}

/// `<project>/.memory/index.md`
pub fn index_file(project_path: &Path) -> PathBuf {
    memory_root(project_path).join("index.md")
}

/// Create the global home and its `tmp/` subdirectory.
pub fn ensure_global_dir() -> Result<()> {
    let dir = global_dir();
    std::fs::create_dir_all(dir.join("tmp"))
        .map_err(|e| DevlogError::from(StorageError::write(&dir, e)))?;
    Ok(())
}

/// Create `knowledge/` and `working/` under the project memory root.
pub fn ensure_project_memory(project_path: &Path) -> Result<()> {
    for dir in [knowledge_dir(project_path), working_dir(project_path)] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| DevlogError::from(StorageError::write(&dir, e)))?;
    }
    Ok(())
}

/// Add a project path to the pending registry if absent.
///
/// Best-effort read-modify-write; a racing writer may briefly clobber another
/// registration, which is benign because the daemon deduplicates against its
/// in-memory project set.
pub fn register_pending_project(project_path: &Path) -> Result<()> {
    register_pending_project_at(&pending_projects_file(), project_path)
}

/// Atomically drain the pending registry: read the list, rewrite it to `[]`.
pub fn consume_pending_projects() -> Result<Vec<PathBuf>> {
    consume_pending_projects_at(&pending_projects_file())
}

fn read_registry(file: &Path) -> Result<Vec<PathBuf>> {
    let contents = match std::fs::read_to_string(file) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::read(file, e).into()),
    };
    serde_json::from_str::<Vec<PathBuf>>(&contents)
        .map_err(|e| StorageError::parse(file, e).into())
}

fn write_registry(file: &Path, paths: &[PathBuf]) -> Result<()> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::write(file, e))?;
    }
    let json =
        serde_json::to_string_pretty(paths).map_err(|e| StorageError::write(file, e))?;
    std::fs::write(file, json).map_err(|e| StorageError::write(file, e))?;
    Ok(())
}

pub(crate) fn register_pending_project_at(file: &Path, project_path: &Path) -> Result<()> {
    let mut paths = read_registry(file).unwrap_or_default();
    if !paths.iter().any(|p| p == project_path) {
        paths.push(project_path.to_path_buf());
        write_registry(file, &paths)?;
    }
    Ok(())
}

pub(crate) fn consume_pending_projects_at(file: &Path) -> Result<Vec<PathBuf>> {
    let paths = read_registry(file)?;
    if !paths.is_empty() {
        write_registry(file, &[])?;
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_layout_paths() {
        let project = Path::new("/work/acme");
        assert_eq!(
            knowledge_dir(project),
            PathBuf::from("/work/acme/.memory/knowledge")
        );
        assert_eq!(
            working_dir(project),
            PathBuf::from("/work/acme/.memory/working")
        );
        assert_eq!(index_file(project), PathBuf::from("/work/acme/.memory/index.md"));
    }

    #[test]
    fn test_register_creates_registry() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("pending-projects.json");

        register_pending_project_at(&file, Path::new("/work/acme")).unwrap();

        let paths = consume_pending_projects_at(&file).unwrap();
        assert_eq!(paths, vec![PathBuf::from("/work/acme")]);
    }

    #[test]
    fn test_register_deduplicates() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("pending-projects.json");

        register_pending_project_at(&file, Path::new("/work/acme")).unwrap();
        register_pending_project_at(&file, Path::new("/work/acme")).unwrap();
        register_pending_project_at(&file, Path::new("/work/other")).unwrap();

        let paths = consume_pending_projects_at(&file).unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("/work/acme"), PathBuf::from("/work/other")]
        );
    }

    #[test]
    fn test_consume_resets_to_empty() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("pending-projects.json");

        register_pending_project_at(&file, Path::new("/work/acme")).unwrap();
        let first = consume_pending_projects_at(&file).unwrap();
        assert_eq!(first.len(), 1);

        let second = consume_pending_projects_at(&file).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_consume_missing_registry_is_empty() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("pending-projects.json");
        assert!(consume_pending_projects_at(&file).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_project_memory_creates_dirs() {
        let tmp = TempDir::new().unwrap();
        ensure_project_memory(tmp.path()).unwrap();
        assert!(knowledge_dir(tmp.path()).is_dir());
        assert!(working_dir(tmp.path()).is_dir());
    }
}
