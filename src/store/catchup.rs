// src/store/catchup.rs
// Precomputed catch-up state under <project>/.memory/working/: recent session
// summaries, the prose summary served to the developer, and the dirty flag
// that schedules regeneration.

use crate::config::{DEBOUNCE_MS, MAX_STALE_MS, RECENT_SUMMARY_LIMIT};
use crate::error::StorageError;
use crate::{DevlogError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const RECENT_SUMMARIES_FILE: &str = "recent-summaries.json";
const PRECOMPUTED_FILE: &str = "catch-up-summary.json";
const STATE_FILE: &str = "catch-up-state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Fresh,
    Stale,
    Computing,
}

/// The prose summary served instantly on catch-up requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecomputedSummary {
    pub source_hash: String,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
    pub status: SummaryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Dirty flag for the catch-up pipeline.
///
/// `dirty_since` is present iff `dirty`; it marks the clean-to-dirty
/// transition and survives repeated mark-dirty calls while still dirty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatchUpState {
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty_since: Option<DateTime<Utc>>,
}

/// Snapshot of one consolidated session, kept for catch-up prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSessionSummary {
    pub session_id: String,
    pub project_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub consolidated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub key_signals: Vec<String>,
    pub files_touched: Vec<String>,
}

/// Decide whether a dirty catch-up summary should be regenerated now.
///
/// Clean state never recomputes. A dirty state with no recorded transition
/// time recomputes immediately. Otherwise wait out the debounce window, but
/// never past the max-stale deadline; that bound holds even when changes
/// keep arriving.
pub fn should_recompute(state: Option<&CatchUpState>) -> bool {
    should_recompute_at(state, Utc::now())
}

fn should_recompute_at(state: Option<&CatchUpState>, now: DateTime<Utc>) -> bool {
    let Some(state) = state else { return false };
    if !state.dirty {
        return false;
    }
    let Some(dirty_since) = state.dirty_since else {
        return true;
    };
    let elapsed = now.signed_duration_since(dirty_since).num_milliseconds();
    elapsed >= MAX_STALE_MS || elapsed >= DEBOUNCE_MS
}

/// Store for one project's catch-up files.
pub struct CatchUpStore {
    working_dir: PathBuf,
}

impl CatchUpStore {
    pub fn new(project_path: &Path) -> Self {
        Self {
            working_dir: crate::paths::working_dir(project_path),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.working_dir.join(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::read(&path, e).into()),
        };
        let value = serde_json::from_str(&contents)
            .map_err(|e| DevlogError::from(StorageError::parse(&path, e)))?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.working_dir)
            .map_err(|e| StorageError::write(&self.working_dir, e))?;
        let path = self.working_dir.join(name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| DevlogError::from(StorageError::write(&path, e)))?;
        std::fs::write(&tmp, json).map_err(|e| StorageError::write(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::write(&path, e))?;
        Ok(())
    }

    pub fn read_precomputed(&self) -> Result<Option<PrecomputedSummary>> {
        self.read_json(PRECOMPUTED_FILE)
    }

    pub fn write_precomputed(&self, summary: &PrecomputedSummary) -> Result<()> {
        self.write_json(PRECOMPUTED_FILE, summary)
    }

    pub fn read_state(&self) -> Result<Option<CatchUpState>> {
        self.read_json(STATE_FILE)
    }

    /// Flip the dirty flag on. Preserves the original `dirty_since` when the
    /// state is already dirty.
    pub fn mark_dirty(&self) -> Result<CatchUpState> {
        let state = match self.read_state()? {
            Some(state) if state.dirty => state,
            _ => CatchUpState {
                dirty: true,
                dirty_since: Some(Utc::now()),
            },
        };
        self.write_json(STATE_FILE, &state)?;
        Ok(state)
    }

    pub fn clear_dirty(&self) -> Result<()> {
        self.write_json(STATE_FILE, &CatchUpState::default())
    }

    pub fn read_recent(&self) -> Result<Vec<RecentSessionSummary>> {
        Ok(self.read_json(RECENT_SUMMARIES_FILE)?.unwrap_or_default())
    }

    /// Prepend a consolidated session's snapshot to the recent list.
    pub fn save_summary(&self, summary: RecentSessionSummary) -> Result<()> {
        let mut recent = self.read_recent()?;
        recent.insert(0, summary);
        self.write_json(RECENT_SUMMARIES_FILE, &recent)
    }

    /// Keep only the newest `limit` summaries.
    pub fn prune_to_limit(&self, limit: usize) -> Result<()> {
        let mut recent = self.read_recent()?;
        if recent.len() > limit {
            recent.truncate(limit);
            self.write_json(RECENT_SUMMARIES_FILE, &recent)?;
        }
        Ok(())
    }

    /// Convenience wrapper using the contract retention cap.
    pub fn prune_to_default_limit(&self) -> Result<()> {
        self.prune_to_limit(RECENT_SUMMARY_LIMIT)
    }
}
