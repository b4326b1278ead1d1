// src/hooks/turn.rs
// Per-turn ingestion: distill one assistant turn into signals, append them
// to the session buffer, and schedule catch-up work.

use crate::store::{CatchUpStore, SessionSignal, SessionStore};
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// A prompt or response below this many non-whitespace characters carries no
/// context worth keeping.
const MIN_CONTEXT_CHARS: usize = 10;

/// Cap on the turn payload read from stdin. A turn larger than this is
/// truncated mid-JSON and rejected rather than buffered without bound.
const MAX_TURN_INPUT_BYTES: u64 = 1_048_576;

/// Ingestion beyond this budget risks eating into the host assistant's own
/// hook timeout; warn so the developer notices before the host kills us.
const SLOW_TURN_HOOK_MS: u128 = 100;

/// One turn's worth of hook context.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnContext {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, alias = "cwd")]
    pub project_path: PathBuf,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub assistant_response: String,
    #[serde(default)]
    pub files_touched: Vec<String>,
}

/// What one ingest call did, for logging and tests.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub session_id: Option<String>,
    pub signals_appended: usize,
    pub skipped_by_marker: bool,
}

fn has_context(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() > MIN_CONTEXT_CHARS
}

fn dedup_preserving_order(files: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(files.len());
    for file in files {
        if !file.is_empty() && !out.iter().any(|f| f == file) {
            out.push(file.clone());
        }
    }
    out
}

/// Build the turn's signals: one `file_touched` when any files changed, one
/// `turn_context` when either side of the exchange has real content.
fn extract_signals(ctx: &TurnContext) -> Vec<SessionSignal> {
    let turn_number = Utc::now().timestamp_millis();
    let mut signals = Vec::new();

    let files = dedup_preserving_order(&ctx.files_touched);
    if !files.is_empty() {
        signals.push(SessionSignal::file_touched(turn_number, files));
    }

    if has_context(&ctx.user_prompt) || has_context(&ctx.assistant_response) {
        let content = format!(
            "User: {}\n\nAssistant: {}",
            ctx.user_prompt.trim(),
            ctx.assistant_response.trim()
        );
        signals.push(SessionSignal::turn_context(turn_number, content));
    }

    signals
}

/// Ingest one turn.
///
/// Skips everything while the daemon's extraction marker exists, so turns
/// generated by the consolidation LLM never feed back into a session. Any
/// produced signal marks the project's catch-up state dirty and registers
/// the project with the daemon.
pub fn ingest(ctx: &TurnContext) -> Result<IngestOutcome> {
    ingest_at(
        ctx,
        &crate::paths::extraction_marker_file(),
        Some(&crate::paths::pending_projects_file()),
    )
}

fn ingest_at(
    ctx: &TurnContext,
    marker: &Path,
    registry: Option<&Path>,
) -> Result<IngestOutcome> {
    if marker.exists() {
        debug!("Extraction in progress; skipping turn ingestion");
        return Ok(IngestOutcome {
            skipped_by_marker: true,
            ..Default::default()
        });
    }

    let signals = extract_signals(ctx);
    if signals.is_empty() {
        return Ok(IngestOutcome::default());
    }

    crate::paths::ensure_project_memory(&ctx.project_path)?;
    let store = SessionStore::new(&ctx.project_path);

    let mut session_id = ctx.session_id.clone();
    if session_id.is_empty() {
        session_id = crate::store::session::UNKNOWN_SESSION_ID.to_string();
    }

    let mut appended = 0;
    let mut resolved_id = None;
    for signal in signals {
        let acc = store.append_signal_and_persist(&session_id, &ctx.project_path, signal)?;
        // The first append may have resolved "unknown" to a concrete id
        session_id = acc.session_id.clone();
        resolved_id = Some(acc.session_id);
        appended += 1;
    }

    CatchUpStore::new(&ctx.project_path).mark_dirty()?;
    if let Some(registry) = registry {
        crate::paths::register_pending_project_at(registry, &ctx.project_path)?;
    }

    Ok(IngestOutcome {
        session_id: resolved_id,
        signals_appended: appended,
        skipped_by_marker: false,
    })
}

/// Hook entry point: read the turn payload from stdin, ingest, and stay
/// silent about problems. The host assistant must never see a failure from
/// this path, so the answer on stdout is always the empty object.
pub fn run() -> anyhow::Result<()> {
    let start = Instant::now();

    let mut raw = String::new();
    std::io::stdin()
        .take(MAX_TURN_INPUT_BYTES)
        .read_to_string(&mut raw)?;
    let ctx: TurnContext = serde_json::from_str(&raw)?;

    if ctx.project_path.as_os_str().is_empty() {
        debug!("Turn hook without project path; nothing to ingest");
    } else {
        match ingest(&ctx) {
            Ok(outcome) => {
                debug!(
                    session_id = outcome.session_id.as_deref().unwrap_or("-"),
                    signals = outcome.signals_appended,
                    "Turn ingested"
                );
            }
            Err(e) => {
                warn!(error = %e, "Turn ingestion failed (non-fatal)");
            }
        }
    }

    let _ = writeln!(std::io::stdout(), "{{}}");

    let elapsed = start.elapsed().as_millis();
    if elapsed > SLOW_TURN_HOOK_MS {
        warn!(elapsed_ms = elapsed as u64, "Turn hook ran long");
    }
    Ok(())
}
