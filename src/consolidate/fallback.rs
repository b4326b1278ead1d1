// src/consolidate/fallback.rs
// Deterministic decision used when the LLM is unreachable or unparsable.
// Heuristics are deliberately conservative: without model judgment no
// section id can be trusted, so the fallback only ever creates or skips.

use crate::consolidate::decision::{DecisionAction, SessionConsolidationDecision};
use crate::store::knowledge::{KnowledgeCategory, NewSection};
use crate::store::{SessionAccumulator, SignalType};
use crate::utils::truncate;

const TITLE_CHARS: usize = 60;
const CONTENT_CHARS: usize = 600;

/// Phrases that mark a turn as recording a decision.
const DECISION_MARKERS: &[&str] = &[
    "decided to",
    "decision:",
    "we chose",
    "chose to",
    "instead of",
    "settled on",
    "agreed to",
];

/// Phrases that mark a turn as recording a pitfall.
const GOTCHA_MARKERS: &[&str] = &[
    "gotcha",
    "watch out",
    "careful:",
    "be careful",
    "pitfall",
    "workaround",
    "surprisingly",
    "turns out",
];

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Derive a section title from the first informative line of a signal.
fn derive_title(content: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Session note");
    let line = line
        .trim_start_matches("User:")
        .trim_start_matches("Assistant:")
        .trim();
    truncate(line, TITLE_CHARS)
}

/// Build the fallback decision from the session's signals alone.
///
/// Scans turn-context signals for decision or gotcha markers and creates a
/// tentative section from the first match; otherwise skips. Never produces
/// an update, confirm, or contradiction.
pub fn fallback_decision(session: &SessionAccumulator) -> SessionConsolidationDecision {
    for signal in &session.signals {
        if signal.signal_type != SignalType::TurnContext {
            continue;
        }
        let lowered = signal.content.to_lowercase();

        let category = if matches_any(&lowered, DECISION_MARKERS) {
            Some(KnowledgeCategory::Decisions)
        } else if matches_any(&lowered, GOTCHA_MARKERS) {
            Some(KnowledgeCategory::Gotchas)
        } else {
            None
        };

        if let Some(category) = category {
            return SessionConsolidationDecision {
                action: DecisionAction::CreateSection,
                category: Some(category),
                section_id: None,
                new_section: Some(NewSection {
                    title: derive_title(&signal.content),
                    content: truncate(&signal.content, CONTENT_CHARS),
                    tags: Some(vec!["auto-captured".to_string()]),
                    examples: None,
                    related_files: if session.files_touched_all.is_empty() {
                        None
                    } else {
                        Some(session.files_touched_all.clone())
                    },
                }),
                extension: None,
                reasoning: Some("heuristic capture; model unavailable".to_string()),
            };
        }
    }

    SessionConsolidationDecision::skip("no durable signal found without model judgment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn session_with(contents: &[&str]) -> SessionAccumulator {
        let now = Utc::now();
        SessionAccumulator {
            session_id: "sess-fb".into(),
            project_path: PathBuf::from("/work/acme"),
            started_at: now,
            last_activity: now,
            turn_count: contents.len() as i64,
            signals: contents
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    crate::store::SessionSignal::turn_context(i as i64 + 1, (*c).to_string())
                })
                .collect(),
            files_touched_all: vec!["/work/acme/src/lib.rs".into()],
            status: crate::store::SessionStatus::Consolidating,
        }
    }

    #[test]
    fn test_decision_marker_creates_in_decisions() {
        let session = session_with(&[
            "User: which db?\n\nAssistant: We decided to keep everything in flat files.",
        ]);
        let decision = fallback_decision(&session);
        assert_eq!(decision.action, DecisionAction::CreateSection);
        assert_eq!(decision.category, Some(KnowledgeCategory::Decisions));
        let new = decision.new_section.unwrap();
        assert!(!new.title.is_empty());
        assert!(new.content.contains("flat files"));
    }

    #[test]
    fn test_gotcha_marker_creates_in_gotchas() {
        let session = session_with(&[
            "User: why did CI fail?\n\nAssistant: Turns out tmpfs does not support atomic rename across devices.",
        ]);
        let decision = fallback_decision(&session);
        assert_eq!(decision.category, Some(KnowledgeCategory::Gotchas));
    }

    #[test]
    fn test_no_marker_skips() {
        let session =
            session_with(&["User: rename this variable\n\nAssistant: Renamed it as requested."]);
        let decision = fallback_decision(&session);
        assert_eq!(decision.action, DecisionAction::Skip);
    }

    #[test]
    fn test_fallback_never_updates_or_confirms() {
        for contents in [
            &["Assistant: we chose to pin the toolchain"][..],
            &["Assistant: careful: the daemon owns the marker file"][..],
            &["Assistant: nothing notable"][..],
        ] {
            let decision = fallback_decision(&session_with(contents));
            assert!(matches!(
                decision.action,
                DecisionAction::CreateSection | DecisionAction::Skip
            ));
            assert!(decision.section_id.is_none());
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let session = session_with(&["Assistant: we settled on tokio for the runtime"]);
        let a = fallback_decision(&session);
        let b = fallback_decision(&session);
        assert_eq!(a.action, b.action);
        assert_eq!(
            a.new_section.as_ref().map(|n| n.title.clone()),
            b.new_section.as_ref().map(|n| n.title.clone())
        );
    }
}
