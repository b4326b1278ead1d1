// src/consolidate/prompt.rs
// Prompt templates for the consolidation and catch-up LLM calls

use crate::store::knowledge::{KnowledgeCategory, KnowledgeSection};
use crate::store::{RecentSessionSummary, SessionAccumulator, SignalType};
use crate::utils::truncate;

/// How much of a section's content the knowledge summary quotes.
const SECTION_PREVIEW_CHARS: usize = 150;

/// How much of a signal the prompt quotes.
const SIGNAL_PREVIEW_CHARS: usize = 300;

/// Summarize existing knowledge for the prompt: per category, one line per
/// section with id, title, content preview, confidence, and observations.
fn format_knowledge(snapshot: &[(KnowledgeCategory, Vec<KnowledgeSection>)]) -> String {
    let mut out = String::new();
    for (category, sections) in snapshot {
        out.push_str(&format!("### {category}\n"));
        if sections.is_empty() {
            out.push_str("(empty)\n");
            continue;
        }
        for section in sections {
            out.push_str(&format!(
                "- [{}] {} | {} | {} observations | {}\n",
                section.id,
                section.title,
                section.confidence,
                section.observations,
                truncate(&section.content.replace('\n', " "), SECTION_PREVIEW_CHARS),
            ));
        }
    }
    out
}

fn format_signals(session: &SessionAccumulator) -> String {
    let mut out = String::new();
    for signal in &session.signals {
        let kind = match signal.signal_type {
            SignalType::FileTouched => "file_touched",
            SignalType::TurnContext => "turn_context",
        };
        out.push_str(&format!(
            "- [{kind}] {}\n",
            truncate(&signal.content.replace('\n', " "), SIGNAL_PREVIEW_CHARS)
        ));
        if let Some(files) = &signal.files {
            out.push_str(&format!("  files: {}\n", files.join(", ")));
        }
    }
    out
}

/// Build the consolidation prompt: existing knowledge, session metadata, and
/// the full signal list, with instructions to answer in a single JSON object.
pub fn build_consolidation_prompt(
    snapshot: &[(KnowledgeCategory, Vec<KnowledgeSection>)],
    session: &SessionAccumulator,
) -> String {
    format!(
        r#"You maintain a project knowledge base for a software developer. A coding
session just ended. Decide how (or whether) it should update the knowledge base.

## Existing knowledge

{knowledge}

## Session

- id: {session_id}
- project: {project}
- turn count: {turn_count}
- signals: {signal_count}
- files touched: {files}

## Session signals

{signals}

## Your decision

Respond with ONE JSON object and nothing else. Schema:

{{
  "action": "skip" | "create_section" | "extend_section" | "add_example" | "confirm_pattern" | "flag_contradiction",
  "category": "conventions" | "architecture" | "decisions" | "gotchas",
  "section_id": "<existing section id, for extend/add_example/confirm>",
  "new_section": {{"title": "...", "content": "...", "tags": ["..."], "examples": ["..."]}},
  "extension": {{"additional_content": "...", "new_examples": ["..."]}},
  "reasoning": "<one sentence>"
}}

Rules:
- Prefer confirming or extending an existing section over creating a near-duplicate.
- Only create a section for knowledge that will matter beyond this session.
- If the session contradicts recorded knowledge, use "flag_contradiction".
- If nothing durable was learned, use "skip"."#,
        knowledge = format_knowledge(snapshot),
        session_id = session.session_id,
        project = session.project_path.display(),
        turn_count = session.turn_count,
        signal_count = session.signals.len(),
        files = if session.files_touched_all.is_empty() {
            "(none)".to_string()
        } else {
            session.files_touched_all.join(", ")
        },
        signals = format_signals(session),
    )
}

/// Build the catch-up summarization prompt over recent consolidated sessions
/// and any still-active work.
pub fn build_catch_up_prompt(
    project: &std::path::Path,
    recent: &[RecentSessionSummary],
    active: &[SessionAccumulator],
) -> String {
    let mut sessions = String::new();
    for summary in recent {
        sessions.push_str(&format!(
            "- consolidated {}: goal: {}; files: {}\n",
            summary.consolidated_at.format("%Y-%m-%d %H:%M"),
            summary.goal.as_deref().unwrap_or("(unknown)"),
            if summary.files_touched.is_empty() {
                "(none)".to_string()
            } else {
                summary.files_touched.join(", ")
            }
        ));
        for signal in &summary.key_signals {
            sessions.push_str(&format!("  - {}\n", truncate(signal, SIGNAL_PREVIEW_CHARS)));
        }
    }

    let mut in_flight = String::new();
    for session in active {
        in_flight.push_str(&format!(
            "- session {} ({} signals), files: {}\n",
            session.session_id,
            session.signals.len(),
            if session.files_touched_all.is_empty() {
                "(none)".to_string()
            } else {
                session.files_touched_all.join(", ")
            }
        ));
    }
    if in_flight.is_empty() {
        in_flight.push_str("(none)\n");
    }

    format!(
        r#"Write a short "catch-up" briefing for a developer returning to the
project at {project}. Two or three sentences of plain prose: what was worked
on recently, and anything still in flight. No headers, no lists, no JSON.

## Recently consolidated sessions

{sessions}

## Active sessions

{in_flight}"#,
        project = project.display(),
        sessions = if sessions.is_empty() {
            "(none)\n".to_string()
        } else {
            sessions
        },
        in_flight = in_flight,
    )
}
