// src/store/session.rs
// Ephemeral per-session buffers: one JSON file per session under
// <project>/.memory/working/, written atomically (tmp + rename).

use crate::error::StorageError;
use crate::{DevlogError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sentinel session id meaning "continue whatever session is open".
pub const UNKNOWN_SESSION_ID: &str = "unknown";

const SESSION_FILE_PREFIX: &str = "session-";

/// The two observation kinds appended during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    FileTouched,
    TurnContext,
}

/// One immutable observation appended to a session buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSignal {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Turn-arrival stamp in epoch milliseconds; monotone within a session.
    pub turn_number: i64,
    pub signal_type: SignalType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl SessionSignal {
    pub fn file_touched(turn_number: i64, files: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            turn_number,
            signal_type: SignalType::FileTouched,
            content: format!("Touched {} file(s)", files.len()),
            files: Some(files),
        }
    }

    pub fn turn_context(turn_number: i64, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            turn_number,
            signal_type: SignalType::TurnContext,
            content,
            files: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Consolidating,
    Closed,
}

/// Append-only per-session buffer.
///
/// `files_touched_all` is the set-union of every signal's `files`, unique and
/// in first-insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAccumulator {
    pub session_id: String,
    pub project_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: i64,
    pub signals: Vec<SessionSignal>,
    pub files_touched_all: Vec<String>,
    pub status: SessionStatus,
}

impl SessionAccumulator {
    fn new(session_id: String, project_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            project_path,
            started_at: now,
            last_activity: now,
            turn_count: 0,
            signals: Vec::new(),
            files_touched_all: Vec::new(),
            status: SessionStatus::Active,
        }
    }

    /// Append a signal, returning the updated accumulator.
    fn with_signal(mut self, signal: SessionSignal) -> Self {
        self.last_activity = Utc::now();
        self.turn_count = self.turn_count.max(signal.turn_number);
        if let Some(files) = &signal.files {
            for file in files {
                if !self.files_touched_all.iter().any(|f| f == file) {
                    self.files_touched_all.push(file.clone());
                }
            }
        }
        self.signals.push(signal);
        self
    }
}

/// Synthesize a fresh unique session id: `sess-<ms>-<4 random base36>`.
fn synthesize_session_id() -> String {
    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| BASE36[rng.random_range(0..36)] as char)
        .collect();
    format!("sess-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Store for one project's session buffers.
pub struct SessionStore {
    working_dir: PathBuf,
}

impl SessionStore {
    pub fn new(project_path: &Path) -> Self {
        Self {
            working_dir: crate::paths::working_dir(project_path),
        }
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.working_dir
            .join(format!("{SESSION_FILE_PREFIX}{session_id}.json"))
    }

    /// Read one session buffer. A missing file is `Ok(None)`, not an error.
    pub fn read(&self, session_id: &str) -> Result<Option<SessionAccumulator>> {
        let path = self.session_file(session_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::read(&path, e).into()),
        };
        let acc = serde_json::from_str(&contents)
            .map_err(|e| DevlogError::from(StorageError::parse(&path, e)))?;
        Ok(Some(acc))
    }

    /// Persist atomically: write `session-<id>.json.tmp`, then rename.
    pub fn persist(&self, acc: &SessionAccumulator) -> Result<()> {
        std::fs::create_dir_all(&self.working_dir)
            .map_err(|e| StorageError::write(&self.working_dir, e))?;
        let path = self.session_file(&acc.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(acc)
            .map_err(|e| DevlogError::from(StorageError::write(&path, e)))?;
        std::fs::write(&tmp, json).map_err(|e| StorageError::write(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::write(&path, e))?;
        Ok(())
    }

    /// Load a session, continuing or creating as needed.
    ///
    /// The `"unknown"` sentinel continues the most recently active session in
    /// the working dir when one exists. Otherwise a fresh accumulator is
    /// synthesized and persisted immediately.
    pub fn get_or_create(
        &self,
        session_id: &str,
        project_path: &Path,
    ) -> Result<SessionAccumulator> {
        if session_id == UNKNOWN_SESSION_ID {
            let mut active = self.with_status(SessionStatus::Active)?;
            active.sort_by_key(|a| a.last_activity);
            if let Some(acc) = active.pop() {
                debug!(session_id = %acc.session_id, "Continuing open session for unknown id");
                return Ok(acc);
            }
        } else if let Some(acc) = self.read(session_id)? {
            return Ok(acc);
        }

        let id = if session_id == UNKNOWN_SESSION_ID {
            synthesize_session_id()
        } else {
            session_id.to_string()
        };
        let acc = SessionAccumulator::new(id, project_path.to_path_buf());
        self.persist(&acc)?;
        Ok(acc)
    }

    /// Append one signal and persist the updated buffer.
    pub fn append_signal_and_persist(
        &self,
        session_id: &str,
        project_path: &Path,
        signal: SessionSignal,
    ) -> Result<SessionAccumulator> {
        let acc = self
            .get_or_create(session_id, project_path)?
            .with_signal(signal);
        self.persist(&acc)?;
        Ok(acc)
    }

    /// Enumerate all session buffers. Unparsable files are logged and
    /// skipped; they stay on disk until repaired.
    pub fn list(&self) -> Result<Vec<SessionAccumulator>> {
        let entries = match std::fs::read_dir(&self.working_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::read(&self.working_dir, e).into()),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(SESSION_FILE_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<SessionAccumulator>(&contents) {
                    Ok(acc) => sessions.push(acc),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unparsable session file");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }
        Ok(sessions)
    }

    fn with_status(&self, status: SessionStatus) -> Result<Vec<SessionAccumulator>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| a.status == status)
            .collect())
    }

    /// Active sessions whose inactivity exceeds `timeout_ms`.
    pub fn find_stale(&self, timeout_ms: i64) -> Result<Vec<SessionAccumulator>> {
        let now = Utc::now();
        Ok(self
            .with_status(SessionStatus::Active)?
            .into_iter()
            .filter(|a| {
                now.signed_duration_since(a.last_activity).num_milliseconds() > timeout_ms
            })
            .collect())
    }

    /// Sessions already finalized and waiting for consolidation.
    pub fn find_to_consolidate(&self) -> Result<Vec<SessionAccumulator>> {
        self.with_status(SessionStatus::Consolidating)
    }

    /// Transition `active -> consolidating`. Idempotent for other statuses.
    pub fn finalize(&self, session_id: &str) -> Result<()> {
        let Some(mut acc) = self.read(session_id)? else {
            return Ok(());
        };
        if acc.status != SessionStatus::Active {
            return Ok(());
        }
        acc.status = SessionStatus::Consolidating;
        self.persist(&acc)
    }

    /// Remove a consolidated session, or rewrite it as `closed` when `keep`.
    pub fn archive(&self, session_id: &str, keep: bool) -> Result<()> {
        if keep {
            if let Some(mut acc) = self.read(session_id)? {
                acc.status = SessionStatus::Closed;
                self.persist(&acc)?;
            }
            return Ok(());
        }
        let path = self.session_file(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::write(&path, e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> SessionStore {
        SessionStore::new(tmp.path())
    }

    #[test]
    fn test_get_or_create_persists_fresh_session() {
        let tmp = TempDir::new().unwrap();
        let acc = store(&tmp).get_or_create("sess-1", tmp.path()).unwrap();
        assert_eq!(acc.session_id, "sess-1");
        assert_eq!(acc.status, SessionStatus::Active);
        assert!(acc.signals.is_empty());
        assert!(store(&tmp).read("sess-1").unwrap().is_some());
    }

    #[test]
    fn test_read_missing_session_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(store(&tmp).read("sess-none").unwrap().is_none());
    }

    #[test]
    fn test_synthesized_id_shape() {
        let id = synthesize_session_id();
        let mut parts = id.splitn(3, '-');
        assert_eq!(parts.next(), Some("sess"));
        let ms: i64 = parts.next().unwrap().parse().unwrap();
        assert!(ms > 0);
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_unknown_continues_most_recent_active() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let mut older = s.get_or_create("sess-old", tmp.path()).unwrap();
        older.last_activity = Utc::now() - Duration::minutes(10);
        s.persist(&older).unwrap();
        s.get_or_create("sess-new", tmp.path()).unwrap();

        let continued = s.get_or_create(UNKNOWN_SESSION_ID, tmp.path()).unwrap();
        assert_eq!(continued.session_id, "sess-new");
    }

    #[test]
    fn test_unknown_without_active_synthesizes() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let acc = s.get_or_create(UNKNOWN_SESSION_ID, tmp.path()).unwrap();
        assert!(acc.session_id.starts_with("sess-"));
        assert_ne!(acc.session_id, UNKNOWN_SESSION_ID);
    }

    #[test]
    fn test_append_updates_counters_and_files() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);

        let sig1 = SessionSignal::file_touched(
            1000,
            vec!["/p/src/a.rs".to_string(), "/p/src/b.rs".to_string()],
        );
        s.append_signal_and_persist("sess-1", tmp.path(), sig1).unwrap();

        let sig2 = SessionSignal::file_touched(
            2000,
            vec!["/p/src/b.rs".to_string(), "/p/src/c.rs".to_string()],
        );
        let acc = s.append_signal_and_persist("sess-1", tmp.path(), sig2).unwrap();

        assert_eq!(acc.turn_count, 2000);
        assert_eq!(acc.signals.len(), 2);
        // Union of signal files, deduplicated, first-insertion order
        assert_eq!(
            acc.files_touched_all,
            vec!["/p/src/a.rs", "/p/src/b.rs", "/p/src/c.rs"]
        );
        assert!(acc.last_activity >= acc.started_at);
    }

    #[test]
    fn test_files_union_invariant_holds_after_reload() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.append_signal_and_persist(
            "sess-1",
            tmp.path(),
            SessionSignal::file_touched(1, vec!["/a".into(), "/b".into()]),
        )
        .unwrap();
        s.append_signal_and_persist(
            "sess-1",
            tmp.path(),
            SessionSignal::turn_context(2, "User: hi\n\nAssistant: hello".into()),
        )
        .unwrap();

        let acc = s.read("sess-1").unwrap().unwrap();
        let mut union: Vec<&str> = Vec::new();
        for sig in &acc.signals {
            for f in sig.files.iter().flatten() {
                if !union.contains(&f.as_str()) {
                    union.push(f);
                }
            }
        }
        assert_eq!(acc.files_touched_all, union);
    }

    #[test]
    fn test_find_stale_by_inactivity() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let mut stale = s.get_or_create("sess-stale", tmp.path()).unwrap();
        stale.last_activity = Utc::now() - Duration::minutes(10);
        s.persist(&stale).unwrap();
        s.get_or_create("sess-fresh", tmp.path()).unwrap();

        let found = s.find_stale(300_000).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, "sess-stale");
    }

    #[test]
    fn test_finalize_then_find_to_consolidate() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.get_or_create("sess-1", tmp.path()).unwrap();
        s.finalize("sess-1").unwrap();

        let pending = s.find_to_consolidate().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, SessionStatus::Consolidating);

        // Finalize is idempotent for non-active sessions
        s.finalize("sess-1").unwrap();
        assert_eq!(s.find_to_consolidate().unwrap().len(), 1);
    }

    #[test]
    fn test_archive_deletes_by_default() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.get_or_create("sess-1", tmp.path()).unwrap();
        s.archive("sess-1", false).unwrap();
        assert!(s.read("sess-1").unwrap().is_none());
        // Archiving a missing session is not an error
        s.archive("sess-1", false).unwrap();
    }

    #[test]
    fn test_archive_keep_marks_closed() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.get_or_create("sess-1", tmp.path()).unwrap();
        s.archive("sess-1", true).unwrap();
        let acc = s.read("sess-1").unwrap().unwrap();
        assert_eq!(acc.status, SessionStatus::Closed);
    }

    #[test]
    fn test_list_skips_corrupt_files() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.get_or_create("sess-ok", tmp.path()).unwrap();
        std::fs::write(
            crate::paths::working_dir(tmp.path()).join("session-broken.json"),
            "{not json",
        )
        .unwrap();

        let sessions = s.list().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "sess-ok");
    }

    #[test]
    fn test_list_ignores_non_session_files() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.get_or_create("sess-ok", tmp.path()).unwrap();
        std::fs::write(
            crate::paths::working_dir(tmp.path()).join("catch-up-state.json"),
            r#"{"dirty": false}"#,
        )
        .unwrap();
        assert_eq!(s.list().unwrap().len(), 1);
    }
}
