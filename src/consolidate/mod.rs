// src/consolidate/mod.rs
// Turn a finalized session into a knowledge-store mutation: load context,
// ask the model for a decision, apply it, then archive the session.
// Callers hold the project lock for the whole operation.

pub mod decision;
pub mod fallback;
pub mod prompt;

use crate::config::CONSOLIDATION_TIMEOUT_SECS;
use crate::error::StorageError;
use crate::llm::LlmClient;
use crate::store::knowledge::{KnowledgeCategory, KnowledgeSection, KnowledgeStore};
use crate::store::{
    CatchUpStore, RecentSessionSummary, SessionAccumulator, SessionStore, SignalType,
};
use crate::utils::truncate;
use crate::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// How many signals a recent-session snapshot keeps.
const KEY_SIGNAL_LIMIT: usize = 5;

/// What one consolidation did.
#[derive(Debug, Clone)]
pub struct ConsolidationOutcome {
    pub action: String,
    pub knowledge_updated: bool,
    pub used_fallback: bool,
}

/// Removes the extraction marker on every exit path, including errors.
struct MarkerGuard {
    path: PathBuf,
}

impl MarkerGuard {
    fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::write(path, e))?;
        }
        std::fs::write(path, std::process::id().to_string())
            .map_err(|e| StorageError::write(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove extraction marker");
            }
        }
    }
}

fn load_knowledge_snapshot(
    store: &KnowledgeStore,
) -> Result<Vec<(KnowledgeCategory, Vec<KnowledgeSection>)>> {
    let mut snapshot = Vec::with_capacity(KnowledgeCategory::ALL.len());
    for category in KnowledgeCategory::ALL {
        snapshot.push((category, store.load_category(category)?));
    }
    Ok(snapshot)
}

/// Derive the optional session goal from the first conversational signal.
fn derive_goal(session: &SessionAccumulator) -> Option<String> {
    session
        .signals
        .iter()
        .find(|s| s.signal_type == SignalType::TurnContext)
        .and_then(|s| {
            s.content
                .lines()
                .find_map(|l| l.trim().strip_prefix("User:"))
                .map(|goal| truncate(goal.trim(), 80))
        })
        .filter(|g| !g.is_empty())
}

fn build_recent_summary(session: &SessionAccumulator) -> RecentSessionSummary {
    let key_signals = session
        .signals
        .iter()
        .filter(|s| s.signal_type == SignalType::TurnContext)
        .take(KEY_SIGNAL_LIMIT)
        .map(|s| truncate(&s.content.replace('\n', " "), 200))
        .collect();

    RecentSessionSummary {
        session_id: session.session_id.clone(),
        project_path: session.project_path.clone(),
        started_at: session.started_at,
        consolidated_at: Utc::now(),
        goal: derive_goal(session),
        key_signals,
        files_touched: session.files_touched_all.clone(),
    }
}

/// Consolidate one session. See [`consolidate_session_at`] for the steps;
/// this wrapper resolves the extraction marker from the global dir.
pub async fn consolidate_session(
    llm: &dyn LlmClient,
    session: &SessionAccumulator,
) -> Result<ConsolidationOutcome> {
    consolidate_session_at(llm, session, &crate::paths::extraction_marker_file()).await
}

/// The full consolidation flow:
///
/// 1. write the extraction marker (hooks stop ingesting model-driven turns),
/// 2. load all four knowledge categories,
/// 3. ask the model for a decision, falling back to heuristics on timeout or
///    unparsable output,
/// 4. apply the decision,
/// 5. snapshot the session for catch-up, archive it, and refresh the index
///    when knowledge changed.
///
/// An error from the apply step propagates; the caller leaves the session in
/// `consolidating` and retries on a later tick.
pub async fn consolidate_session_at(
    llm: &dyn LlmClient,
    session: &SessionAccumulator,
    marker: &Path,
) -> Result<ConsolidationOutcome> {
    let _marker = MarkerGuard::create(marker)?;

    let knowledge = KnowledgeStore::new(&session.project_path);
    let snapshot = load_knowledge_snapshot(&knowledge)?;
    let prompt = prompt::build_consolidation_prompt(&snapshot, session);

    let mut used_fallback = false;
    let decision = match llm
        .generate(&prompt, Duration::from_secs(CONSOLIDATION_TIMEOUT_SECS))
        .await
    {
        Ok(raw) => match decision::parse_decision(&raw) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "Unparsable decision; using fallback");
                used_fallback = true;
                fallback::fallback_decision(session)
            }
        },
        Err(e) => {
            warn!(session_id = %session.session_id, error = %e, "LLM call failed; using fallback");
            used_fallback = true;
            fallback::fallback_decision(session)
        }
    };

    let outcome = knowledge.apply_decision(&decision)?;

    let catchup = CatchUpStore::new(&session.project_path);
    catchup.save_summary(build_recent_summary(session))?;
    catchup.prune_to_default_limit()?;

    SessionStore::new(&session.project_path).archive(&session.session_id, false)?;

    if outcome.knowledge_updated {
        crate::store::index::update_index(&session.project_path)?;
    }

    info!(
        session_id = %session.session_id,
        action = %outcome.action,
        used_fallback,
        "Session consolidated"
    );

    Ok(ConsolidationOutcome {
        action: outcome.action,
        knowledge_updated: outcome.knowledge_updated,
        used_fallback,
    })
}
