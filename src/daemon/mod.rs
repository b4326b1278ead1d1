// src/daemon/mod.rs
// The background control loop: discover projects, finalize stale sessions,
// consolidate them, sweep knowledge for decay, and keep catch-up summaries
// fresh. Single process; all per-project mutation goes through the project
// lock.

pub mod status;

use crate::config::{
    CATCH_UP_TIMEOUT_SECS, DECAY_THRESHOLD_DAYS, REVIEW_THRESHOLD_DAYS,
    STALENESS_CHECK_INTERVAL_MS, SessionConfig,
};
use crate::consolidate;
use crate::llm::LlmClient;
use crate::lock::with_project_lock;
use crate::store::knowledge::{DecayAction, KnowledgeStore};
use crate::store::{
    CatchUpStore, PrecomputedSummary, SessionAccumulator, SessionStore, SummaryStatus,
    catchup::should_recompute,
};
use crate::error::DaemonError;
use crate::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use status::{DaemonStatus, ProjectStats, acquire_pid_file, release_pid_file};

pub struct Daemon {
    llm: Arc<dyn LlmClient>,
    session_config: SessionConfig,
    poll_interval: Duration,
    status_file: PathBuf,
    pid_file: PathBuf,
    pending_file: PathBuf,
    marker_file: PathBuf,
    started_at: DateTime<Utc>,
    sessions_processed: u64,
    last_consolidation: Option<DateTime<Utc>>,
    last_staleness_check: Option<DateTime<Utc>>,
    projects: BTreeMap<PathBuf, ProjectStats>,
}

impl Daemon {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            session_config: SessionConfig::load(),
            poll_interval: Duration::from_millis(crate::config::poll_interval_ms()),
            status_file: crate::paths::daemon_status_file(),
            pid_file: crate::paths::daemon_pid_file(),
            pending_file: crate::paths::pending_projects_file(),
            marker_file: crate::paths::extraction_marker_file(),
            started_at: Utc::now(),
            sessions_processed: 0,
            last_consolidation: None,
            last_staleness_check: None,
            projects: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    fn with_global_dir(llm: Arc<dyn LlmClient>, global: &Path) -> Self {
        Self {
            llm,
            session_config: SessionConfig::default(),
            poll_interval: Duration::from_millis(10),
            status_file: global.join("daemon.status"),
            pid_file: global.join("daemon.pid"),
            pending_file: global.join("pending-projects.json"),
            marker_file: global.join("tmp").join("extraction-in-progress"),
            started_at: Utc::now(),
            sessions_processed: 0,
            last_consolidation: None,
            last_staleness_check: None,
            projects: BTreeMap::new(),
        }
    }

    /// Claim the pid file and restore the project set from the last status
    /// snapshot, dropping projects whose memory dirs are gone.
    pub fn startup(&mut self) -> Result<()> {
        if let Some(parent) = self.status_file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::StorageError::write(parent, e))?;
        }
        acquire_pid_file(&self.pid_file)?;

        if let Some(previous) = DaemonStatus::read(&self.status_file) {
            for (path, stats) in previous.projects {
                if crate::paths::working_dir(&path).is_dir() {
                    self.projects.insert(path, stats);
                } else {
                    debug!(project = %path.display(), "Dropping restored project without memory dir");
                }
            }
            info!(projects = self.projects.len(), "Restored project set from status file");
        }
        Ok(())
    }

    /// Run until the shutdown flag flips. In-flight work finishes before the
    /// final status write; the pid file is released on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.startup()?;
        info!(model = %self.llm.model_name(), "Daemon started");

        if !self.llm.health().await {
            warn!("Model service is unreachable; consolidations will use the heuristic fallback");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;
            self.write_status(true);

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Daemon shutting down");
        self.write_status(false);
        release_pid_file(&self.pid_file);
        Ok(())
    }

    /// One pass of the control loop.
    async fn tick(&mut self) {
        self.discover_projects();

        let projects: Vec<PathBuf> = self.projects.keys().cloned().collect();
        for project in &projects {
            self.finalize_stale_sessions(project);
        }
        for project in &projects {
            self.consolidate_project(project).await;
        }
        self.decay_sweep(&projects).await;
        for project in &projects {
            self.recompute_catch_up(project).await;
        }
    }

    /// Drain the pending registry into the in-memory project set.
    fn discover_projects(&mut self) {
        let pending = match crate::paths::consume_pending_projects_at(&self.pending_file) {
            Ok(pending) => pending,
            Err(e) => {
                let err = DaemonError::Queue(e.to_string());
                warn!(error = %err, "Failed to drain pending-project registry");
                return;
            }
        };
        for path in pending {
            if self.projects.contains_key(&path) {
                continue;
            }
            if !crate::paths::working_dir(&path).is_dir() {
                debug!(project = %path.display(), "Ignoring pending project without memory dir");
                continue;
            }
            info!(project = %path.display(), "Discovered project");
            self.projects.insert(path, ProjectStats::default());
        }
    }

    /// Move sessions that have gone quiet into `consolidating`.
    fn finalize_stale_sessions(&self, project: &Path) {
        let store = SessionStore::new(project);
        let stale = match store.find_stale(self.session_config.timeout_ms) {
            Ok(stale) => stale,
            Err(e) => {
                let err = DaemonError::Storage(e.to_string());
                warn!(project = %project.display(), error = %err, "Stale-session scan failed");
                return;
            }
        };
        for session in stale {
            debug!(session_id = %session.session_id, "Finalizing stale session");
            if let Err(e) = store.finalize(&session.session_id) {
                warn!(session_id = %session.session_id, error = %e, "Failed to finalize session");
            }
        }
    }

    /// Consolidate every waiting session for one project, serially under the
    /// project lock. Failures leave the session in `consolidating` for the
    /// next tick.
    async fn consolidate_project(&mut self, project: &Path) {
        let store = SessionStore::new(project);
        let sessions = match store.find_to_consolidate() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(project = %project.display(), error = %e, "Consolidation scan failed");
                return;
            }
        };

        for session in sessions {
            let llm = self.llm.clone();
            let marker = self.marker_file.clone();
            let session_id = session.session_id.clone();
            let signal_count = session.signals.len() as u64;
            let result = with_project_lock(project, move || async move {
                consolidate::consolidate_session_at(llm.as_ref(), &session, &marker).await
            })
            .await;

            match result {
                Ok(outcome) => {
                    let now = Utc::now();
                    self.sessions_processed += 1;
                    self.last_consolidation = Some(now);
                    if let Some(stats) = self.projects.get_mut(project) {
                        stats.events_processed += signal_count;
                        stats.memories_extracted += 1;
                        stats.last_activity = Some(now);
                    }
                    debug!(
                        session_id = %session_id,
                        action = %outcome.action,
                        "Consolidation committed"
                    );
                }
                Err(e) => {
                    let err = DaemonError::Extraction(e.to_string());
                    warn!(
                        session_id = %session_id,
                        error = %err,
                        "Consolidation failed; session stays queued"
                    );
                }
            }
        }
    }

    /// Hourly knowledge decay pass across all projects.
    async fn decay_sweep(&mut self, projects: &[PathBuf]) {
        let now = Utc::now();
        if let Some(last) = self.last_staleness_check
            && now.signed_duration_since(last).num_milliseconds() < STALENESS_CHECK_INTERVAL_MS
        {
            return;
        }
        self.last_staleness_check = Some(now);

        for project in projects {
            let decayed = with_project_lock(project, move || async move {
                let store = KnowledgeStore::new(project);
                let stale = store.find_stale(DECAY_THRESHOLD_DAYS, REVIEW_THRESHOLD_DAYS)?;
                let mut confidence_changed = false;
                for entry in &stale {
                    match store.apply_decay(entry) {
                        Ok(DecayAction::Decayed) => {
                            info!(
                                project = %project.display(),
                                section = %entry.section_id,
                                "Section decayed to tentative"
                            );
                            confidence_changed = true;
                        }
                        Ok(DecayAction::FlaggedForReview) => {
                            info!(
                                project = %project.display(),
                                section = %entry.section_id,
                                "Section flagged for review"
                            );
                        }
                        Ok(DecayAction::Skipped) => {}
                        Err(e) => {
                            warn!(section = %entry.section_id, error = %e, "Decay failed");
                        }
                    }
                }
                if confidence_changed {
                    crate::store::index::update_index(project)?;
                }
                Ok::<bool, crate::DevlogError>(confidence_changed)
            })
            .await;

            if let Err(e) = decayed {
                let err = DaemonError::Decay(e.to_string());
                warn!(project = %project.display(), error = %err, "Decay sweep failed");
            }
        }
    }

    /// Fingerprint of everything that feeds the catch-up summary.
    fn catch_up_source_hash(
        active: &[SessionAccumulator],
        recent_ids: &[(String, DateTime<Utc>)],
    ) -> String {
        let mut hasher = Sha256::new();
        for session in active {
            hasher.update(session.session_id.as_bytes());
            hasher.update(session.last_activity.to_rfc3339().as_bytes());
            hasher.update(session.signals.len().to_le_bytes());
        }
        for (id, consolidated_at) in recent_ids {
            hasher.update(id.as_bytes());
            hasher.update(consolidated_at.to_rfc3339().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Regenerate the precomputed summary when the debounce rule says so.
    /// On failure the previous summary is kept, marked stale with the error,
    /// and the dirty flag stays set for a retry.
    async fn recompute_catch_up(&mut self, project: &Path) {
        let catchup = CatchUpStore::new(project);
        let state = match catchup.read_state() {
            Ok(state) => state,
            Err(e) => {
                warn!(project = %project.display(), error = %e, "Failed to read catch-up state");
                return;
            }
        };
        if !should_recompute(state.as_ref()) {
            return;
        }

        let llm = self.llm.clone();
        let result = with_project_lock(project, move || async move {
            let recent = catchup.read_recent()?;
            let active = SessionStore::new(project).list()?;
            let recent_ids: Vec<(String, DateTime<Utc>)> = recent
                .iter()
                .map(|r| (r.session_id.clone(), r.consolidated_at))
                .collect();
            let source_hash = Self::catch_up_source_hash(&active, &recent_ids);

            let prompt = consolidate::prompt::build_catch_up_prompt(project, &recent, &active);
            match llm
                .generate(&prompt, Duration::from_secs(CATCH_UP_TIMEOUT_SECS))
                .await
            {
                Ok(summary) => {
                    catchup.write_precomputed(&PrecomputedSummary {
                        source_hash,
                        summary: summary.trim().to_string(),
                        generated_at: Utc::now(),
                        status: SummaryStatus::Fresh,
                        last_error: None,
                    })?;
                    catchup.clear_dirty()?;
                    info!(project = %project.display(), "Catch-up summary regenerated");
                }
                Err(e) => {
                    warn!(project = %project.display(), error = %e, "Catch-up regeneration failed");
                    if let Some(mut prior) = catchup.read_precomputed()? {
                        prior.status = SummaryStatus::Stale;
                        prior.last_error = Some(e.to_string());
                        catchup.write_precomputed(&prior)?;
                    }
                }
            }
            Ok::<(), crate::DevlogError>(())
        })
        .await;

        if let Err(e) = result {
            warn!(project = %project.display(), error = %e, "Catch-up pass failed");
        }
    }

    fn write_status(&self, running: bool) {
        let snapshot = DaemonStatus {
            running,
            pid: std::process::id(),
            started_at: self.started_at,
            sessions_processed: self.sessions_processed,
            last_consolidation: self.last_consolidation,
            last_staleness_check: self.last_staleness_check,
            projects: self.projects.clone(),
        };
        if let Err(e) = snapshot.write(&self.status_file) {
            warn!(error = %e, "Failed to write daemon status");
        }
    }
}

/// Wire SIGINT/SIGTERM to the shutdown flag.
pub fn shutdown_channel() -> Result<(watch::Sender<bool>, watch::Receiver<bool>)> {
    let (tx, rx) = watch::channel(false);
    let sender = tx.clone();
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        let _ = sender.send(true);
    });
    Ok((tx, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CatchUpState;
    use crate::store::knowledge::{Confidence, KnowledgeCategory, NewSection};
    use crate::DevlogError;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    struct ScriptedLlm {
        response: Option<String>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String> {
            self.response
                .clone()
                .ok_or_else(|| DevlogError::Llm("scripted failure".into()))
        }

        async fn health(&self) -> bool {
            true
        }

        fn model_name(&self) -> String {
            "scripted".into()
        }
    }

    fn daemon_with(response: Option<&str>, global: &TempDir) -> Daemon {
        let llm = Arc::new(ScriptedLlm {
            response: response.map(String::from),
        });
        Daemon::with_global_dir(llm, global.path())
    }

    fn seed_stale_session(project: &Path) {
        let store = SessionStore::new(project);
        let mut acc = store
            .append_signal_and_persist(
                "sess-d1",
                project,
                crate::store::SessionSignal::turn_context(
                    1,
                    "User: wire up the daemon loop\n\nAssistant: We decided to poll every five seconds.".into(),
                ),
            )
            .unwrap();
        acc.last_activity = Utc::now() - ChronoDuration::minutes(10);
        store.persist(&acc).unwrap();
    }

    #[tokio::test]
    async fn test_tick_discovers_finalizes_and_consolidates() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(project.path()).unwrap();
        seed_stale_session(project.path());

        let mut daemon = daemon_with(Some(r#"{"action":"skip","reasoning":"test"}"#), &global);
        crate::paths::register_pending_project_at(
            &daemon.pending_file,
            project.path(),
        )
        .unwrap();

        daemon.tick().await;

        assert_eq!(daemon.sessions_processed, 1);
        let stats = &daemon.projects[project.path()];
        assert_eq!(stats.memories_extracted, 1);
        assert_eq!(stats.events_processed, 1);
        assert!(daemon.last_consolidation.is_some());
        // Session archived
        assert!(SessionStore::new(project.path()).read("sess-d1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discover_ignores_project_without_memory_dir() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let mut daemon = daemon_with(None, &global);
        crate::paths::register_pending_project_at(&daemon.pending_file, project.path()).unwrap();
        daemon.discover_projects();
        assert!(daemon.projects.is_empty());

        crate::paths::ensure_project_memory(project.path()).unwrap();
        crate::paths::register_pending_project_at(&daemon.pending_file, project.path()).unwrap();
        daemon.discover_projects();
        assert_eq!(daemon.projects.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_consolidation_stays_queued() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(project.path()).unwrap();
        seed_stale_session(project.path());

        // Apply step fails: confirm on a section that does not exist
        let mut daemon = daemon_with(
            Some(r#"{"action":"confirm_pattern","category":"decisions","section_id":"deci-00000000"}"#),
            &global,
        );
        crate::paths::register_pending_project_at(&daemon.pending_file, project.path()).unwrap();

        daemon.tick().await;

        assert_eq!(daemon.sessions_processed, 0);
        let acc = SessionStore::new(project.path()).read("sess-d1").unwrap().unwrap();
        assert_eq!(acc.status, crate::store::SessionStatus::Consolidating);
    }

    #[tokio::test]
    async fn test_decay_sweep_rate_limited() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(project.path()).unwrap();

        let knowledge = KnowledgeStore::new(project.path());
        let section = knowledge
            .add_section(
                KnowledgeCategory::Decisions,
                NewSection {
                    title: "Old decision".into(),
                    content: "Past its prime.".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut sections = knowledge.load_category(KnowledgeCategory::Decisions).unwrap();
        sections[0].confidence = Confidence::Established;
        sections[0].last_confirmed = Some(Utc::now() - ChronoDuration::days(40));
        knowledge.save_category(KnowledgeCategory::Decisions, &sections).unwrap();

        let mut daemon = daemon_with(None, &global);
        daemon.projects.insert(project.path().to_path_buf(), ProjectStats::default());

        // A recent check suppresses the sweep
        daemon.last_staleness_check = Some(Utc::now());
        daemon.decay_sweep(&[project.path().to_path_buf()]).await;
        let unchanged = knowledge.load_category(KnowledgeCategory::Decisions).unwrap();
        assert_eq!(unchanged[0].confidence, Confidence::Established);

        // An hour later the sweep runs and decays the section
        daemon.last_staleness_check =
            Some(Utc::now() - ChronoDuration::milliseconds(STALENESS_CHECK_INTERVAL_MS + 1));
        daemon.decay_sweep(&[project.path().to_path_buf()]).await;
        let decayed = knowledge.load_category(KnowledgeCategory::Decisions).unwrap();
        assert_eq!(decayed[0].confidence, Confidence::Tentative);
        assert_eq!(decayed[0].id, section.id);
        assert!(crate::paths::index_file(project.path()).exists());
    }

    #[tokio::test]
    async fn test_catch_up_recompute_success_clears_dirty() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(project.path()).unwrap();

        let catchup = CatchUpStore::new(project.path());
        // Past the debounce window
        let state = CatchUpState {
            dirty: true,
            dirty_since: Some(Utc::now() - ChronoDuration::seconds(31)),
        };
        std::fs::write(
            crate::paths::working_dir(project.path()).join("catch-up-state.json"),
            serde_json::to_string(&state).unwrap(),
        )
        .unwrap();

        let mut daemon = daemon_with(Some("Worked on the daemon loop recently."), &global);
        daemon.recompute_catch_up(project.path()).await;

        let summary = catchup.read_precomputed().unwrap().unwrap();
        assert_eq!(summary.status, SummaryStatus::Fresh);
        assert_eq!(summary.summary, "Worked on the daemon loop recently.");
        assert!(!summary.source_hash.is_empty());
        let state = catchup.read_state().unwrap().unwrap();
        assert!(!state.dirty);
    }

    #[tokio::test]
    async fn test_catch_up_failure_marks_stale_keeps_dirty() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(project.path()).unwrap();

        let catchup = CatchUpStore::new(project.path());
        catchup
            .write_precomputed(&PrecomputedSummary {
                source_hash: "old".into(),
                summary: "Previously: store refactor.".into(),
                generated_at: Utc::now(),
                status: SummaryStatus::Fresh,
                last_error: None,
            })
            .unwrap();
        let state = CatchUpState {
            dirty: true,
            dirty_since: Some(Utc::now() - ChronoDuration::seconds(31)),
        };
        std::fs::write(
            crate::paths::working_dir(project.path()).join("catch-up-state.json"),
            serde_json::to_string(&state).unwrap(),
        )
        .unwrap();

        let mut daemon = daemon_with(None, &global);
        daemon.recompute_catch_up(project.path()).await;

        let summary = catchup.read_precomputed().unwrap().unwrap();
        assert_eq!(summary.status, SummaryStatus::Stale);
        assert!(summary.last_error.is_some());
        assert_eq!(summary.summary, "Previously: store refactor.");
        // Dirty flag survives for the retry
        assert!(catchup.read_state().unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn test_catch_up_quiet_before_debounce() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(project.path()).unwrap();

        let catchup = CatchUpStore::new(project.path());
        catchup.mark_dirty().unwrap();

        let mut daemon = daemon_with(Some("should not be called"), &global);
        daemon.recompute_catch_up(project.path()).await;

        assert!(catchup.read_precomputed().unwrap().is_none());
        assert!(catchup.read_state().unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn test_startup_restores_projects_and_filters_gone() {
        let global = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        crate::paths::ensure_project_memory(live.path()).unwrap();

        let mut projects = BTreeMap::new();
        projects.insert(live.path().to_path_buf(), ProjectStats {
            events_processed: 7,
            memories_extracted: 2,
            last_activity: None,
        });
        projects.insert(PathBuf::from("/gone/project"), ProjectStats::default());
        let snapshot = DaemonStatus {
            running: false,
            pid: 0,
            started_at: Utc::now(),
            sessions_processed: 9,
            last_consolidation: None,
            last_staleness_check: None,
            projects,
        };

        let mut daemon = daemon_with(None, &global);
        snapshot.write(&daemon.status_file).unwrap();
        daemon.startup().unwrap();

        assert_eq!(daemon.projects.len(), 1);
        assert_eq!(daemon.projects[live.path()].events_processed, 7);
        assert!(daemon.pid_file.exists());
    }
}
