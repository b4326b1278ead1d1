// src/consolidate/decision.rs
// The LLM's consolidation decision: a tagged variant over `action` with
// per-variant required fields, parsed leniently from raw model output.

use crate::store::knowledge::{KnowledgeCategory, NewSection};
use crate::utils::json::parse_llm_object;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

/// Closed action set. Anything else the model invents degrades to
/// `Unknown`, which applies as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Skip,
    CreateSection,
    ExtendSection,
    AddExample,
    ConfirmPattern,
    FlagContradiction,
    Unknown,
}

impl DecisionAction {
    fn from_raw(raw: &str) -> Self {
        match raw {
            "skip" => Self::Skip,
            "create_section" => Self::CreateSection,
            "extend_section" => Self::ExtendSection,
            "add_example" => Self::AddExample,
            "confirm_pattern" => Self::ConfirmPattern,
            "flag_contradiction" => Self::FlagContradiction,
            other => {
                debug!(action = other, "Unknown decision action; degrading to no-op");
                Self::Unknown
            }
        }
    }
}

/// Payload for `extend_section` and `add_example`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionExtension {
    #[serde(default)]
    pub additional_content: Option<String>,
    #[serde(default)]
    pub new_examples: Option<Vec<String>>,
}

/// One parsed, validated consolidation decision.
#[derive(Debug, Clone)]
pub struct SessionConsolidationDecision {
    pub action: DecisionAction,
    pub category: Option<KnowledgeCategory>,
    pub section_id: Option<String>,
    pub new_section: Option<NewSection>,
    pub extension: Option<DecisionExtension>,
    pub reasoning: Option<String>,
}

impl SessionConsolidationDecision {
    pub fn skip(reasoning: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Skip,
            category: None,
            section_id: None,
            new_section: None,
            extension: None,
            reasoning: Some(reasoning.into()),
        }
    }
}

/// Wire shape as the model emits it; all fields free-form until validated.
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    section_id: Option<String>,
    #[serde(default)]
    new_section: Option<NewSection>,
    #[serde(default)]
    extension: Option<DecisionExtension>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse a decision out of raw LLM output.
///
/// Tolerates think-blocks, fences, and prose around the JSON object. An
/// unknown action degrades to a no-op; an invalid category is dropped so the
/// per-action precondition checks report it. Output with no parsable object
/// at all is an error, which callers answer with the heuristic fallback.
pub fn parse_decision(raw: &str) -> Result<SessionConsolidationDecision, String> {
    let parsed: RawDecision = parse_llm_object(raw)?;

    let category = match parsed.category.as_deref() {
        Some(raw_category) => match KnowledgeCategory::from_str(raw_category) {
            Ok(category) => Some(category),
            Err(e) => {
                debug!(error = %e, "Decision carried an invalid category; dropping it");
                None
            }
        },
        None => None,
    };

    Ok(SessionConsolidationDecision {
        action: DecisionAction::from_raw(parsed.action.trim()),
        category,
        section_id: parsed.section_id,
        new_section: parsed.new_section,
        extension: parsed.extension,
        reasoning: parsed.reasoning,
    })
}
