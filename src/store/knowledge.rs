// src/store/knowledge.rs
// Durable project knowledge: one markdown file per category under
// <project>/.memory/knowledge/, with a confidence model and decay rules.

use crate::consolidate::decision::{DecisionAction, SessionConsolidationDecision};
use crate::error::StorageError;
use crate::store::markdown;
use crate::{DevlogError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Closed category set; each category is a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeCategory {
    Conventions,
    Architecture,
    Decisions,
    Gotchas,
}

impl KnowledgeCategory {
    pub const ALL: [KnowledgeCategory; 4] = [
        KnowledgeCategory::Conventions,
        KnowledgeCategory::Architecture,
        KnowledgeCategory::Decisions,
        KnowledgeCategory::Gotchas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conventions => "conventions",
            Self::Architecture => "architecture",
            Self::Decisions => "decisions",
            Self::Gotchas => "gotchas",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.md", self.as_str())
    }

    /// Section-id prefix: the category's first four letters.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Conventions => "conv",
            Self::Architecture => "arch",
            Self::Decisions => "deci",
            Self::Gotchas => "gotc",
        }
    }
}

impl FromStr for KnowledgeCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conventions" => Ok(Self::Conventions),
            "architecture" => Ok(Self::Architecture),
            "decisions" => Ok(Self::Decisions),
            "gotchas" => Ok(Self::Gotchas),
            other => Err(format!("unknown knowledge category: {other:?}")),
        }
    }
}

impl std::fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence ladder. `tentative < developing < established`; `canonical` is
/// a terminal state outside the ladder; it never decays and is never set by
/// the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Tentative,
    Developing,
    Established,
    Canonical,
}

impl Confidence {
    pub fn is_canonical(&self) -> bool {
        matches!(self, Confidence::Canonical)
    }

    /// Position on the upgrade ladder; canonical sits above it.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Tentative => 0,
            Self::Developing => 1,
            Self::Established => 2,
            Self::Canonical => 3,
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tentative" => Ok(Self::Tentative),
            "developing" => Ok(Self::Developing),
            "established" => Ok(Self::Established),
            "canonical" => Ok(Self::Canonical),
            other => Err(format!("unknown confidence level: {other:?}")),
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tentative => "tentative",
            Self::Developing => "developing",
            Self::Established => "established",
            Self::Canonical => "canonical",
        };
        f.write_str(s)
    }
}

/// One knowledge section within a category file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSection {
    pub id: String,
    pub title: String,
    pub content: String,
    pub confidence: Confidence,
    pub first_observed: NaiveDate,
    pub last_updated: DateTime<Utc>,
    pub observations: u32,
    pub tags: Option<Vec<String>>,
    pub examples: Option<Vec<String>>,
    pub related_files: Option<Vec<String>>,
    pub last_referenced: Option<DateTime<Utc>>,
    pub last_confirmed: Option<DateTime<Utc>>,
    pub flagged_for_review: Option<DateTime<Utc>>,
}

/// Fields for a freshly created section; everything else is stamped by the
/// store (`confidence=tentative`, `observations=1`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSection {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub examples: Option<Vec<String>>,
    #[serde(default)]
    pub related_files: Option<Vec<String>>,
}

/// Partial update merged into an existing section. `last_updated` is always
/// refreshed regardless of which fields are set.
#[derive(Debug, Clone, Default)]
pub struct SectionUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub examples: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub related_files: Option<Vec<String>>,
}

/// Staleness report entry for one non-canonical section.
#[derive(Debug, Clone, Serialize)]
pub struct StaleSection {
    pub category: KnowledgeCategory,
    pub section_id: String,
    pub title: String,
    pub confidence: Confidence,
    pub days_since_confirmed: i64,
    pub eligible_for_decay: bool,
    pub eligible_for_review: bool,
}

/// What a decay pass did to one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayAction {
    Decayed,
    FlaggedForReview,
    Skipped,
}

/// Result of applying one consolidation decision.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub action: String,
    pub knowledge_updated: bool,
    pub section_id: Option<String>,
}

/// Store for one project's knowledge files.
pub struct KnowledgeStore {
    knowledge_dir: PathBuf,
}

impl KnowledgeStore {
    pub fn new(project_path: &Path) -> Self {
        Self {
            knowledge_dir: crate::paths::knowledge_dir(project_path),
        }
    }

    fn category_file(&self, category: KnowledgeCategory) -> PathBuf {
        self.knowledge_dir.join(category.file_name())
    }

    /// Load every section of a category. A missing file is an empty category.
    pub fn load_category(&self, category: KnowledgeCategory) -> Result<Vec<KnowledgeSection>> {
        let path = self.category_file(category);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::read(&path, e).into()),
        };
        markdown::parse_category(&path, &contents)
    }

    /// Rewrite a category file atomically (tmp + rename).
    pub fn save_category(
        &self,
        category: KnowledgeCategory,
        sections: &[KnowledgeSection],
    ) -> Result<()> {
        std::fs::create_dir_all(&self.knowledge_dir)
            .map_err(|e| StorageError::write(&self.knowledge_dir, e))?;
        let path = self.category_file(category);
        let tmp = path.with_extension("md.tmp");
        let rendered = markdown::render_category(category, sections);
        std::fs::write(&tmp, rendered).map_err(|e| StorageError::write(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::write(&path, e))?;
        Ok(())
    }

    /// Create a section: `id = <cat4>-<8 random hex>`, `confidence=tentative`,
    /// `observations=1`, stamped with today's date.
    pub fn add_section(
        &self,
        category: KnowledgeCategory,
        new: NewSection,
    ) -> Result<KnowledgeSection> {
        let now = Utc::now();
        let section = KnowledgeSection {
            id: format!("{}-{:08x}", category.id_prefix(), rand::rng().random::<u32>()),
            title: new.title,
            content: new.content,
            confidence: Confidence::Tentative,
            first_observed: now.date_naive(),
            last_updated: now,
            observations: 1,
            tags: new.tags,
            examples: new.examples,
            related_files: new.related_files,
            last_referenced: None,
            last_confirmed: None,
            flagged_for_review: None,
        };

        let mut sections = self.load_category(category)?;
        sections.push(section.clone());
        self.save_category(category, &sections)?;
        debug!(category = %category, id = %section.id, "Added knowledge section");
        Ok(section)
    }

    fn mutate_section<F>(
        &self,
        category: KnowledgeCategory,
        section_id: &str,
        mutate: F,
    ) -> Result<KnowledgeSection>
    where
        F: FnOnce(&mut KnowledgeSection),
    {
        let mut sections = self.load_category(category)?;
        let Some(section) = sections.iter_mut().find(|s| s.id == section_id) else {
            return Err(DevlogError::InvalidInput(format!(
                "no section {section_id} in {category}"
            )));
        };
        mutate(section);
        let updated = section.clone();
        self.save_category(category, &sections)?;
        Ok(updated)
    }

    /// Merge an update into a section; always refreshes `last_updated`.
    pub fn update_section(
        &self,
        category: KnowledgeCategory,
        section_id: &str,
        update: SectionUpdate,
    ) -> Result<KnowledgeSection> {
        self.mutate_section(category, section_id, |section| {
            if let Some(title) = update.title {
                section.title = title;
            }
            if let Some(content) = update.content {
                section.content = content;
            }
            if let Some(examples) = update.examples {
                section.examples = Some(examples);
            }
            if let Some(tags) = update.tags {
                section.tags = Some(tags);
            }
            if let Some(related_files) = update.related_files {
                section.related_files = Some(related_files);
            }
            section.last_updated = Utc::now();
        })
    }

    /// Count a re-observation: bump `observations`, refresh `last_updated`
    /// and `last_confirmed`, then apply the confidence upgrade rule.
    ///
    /// Upgrade rule (never applied to canonical): observations >= 10 gives
    /// `established`; else observations >= 5 upgrades `tentative` to
    /// `developing`. Confidence never moves down this path.
    pub fn confirm_section(
        &self,
        category: KnowledgeCategory,
        section_id: &str,
    ) -> Result<KnowledgeSection> {
        self.mutate_section(category, section_id, |section| {
            let now = Utc::now();
            section.observations = section.observations.saturating_add(1);
            section.last_updated = now;
            section.last_confirmed = Some(now);

            if !section.confidence.is_canonical() {
                if section.observations >= 10 {
                    section.confidence = Confidence::Established;
                } else if section.observations >= 5
                    && section.confidence == Confidence::Tentative
                {
                    section.confidence = Confidence::Developing;
                }
            }
        })
    }

    /// Remove a section. Returns whether anything was deleted.
    pub fn delete_section(
        &self,
        category: KnowledgeCategory,
        section_id: &str,
    ) -> Result<bool> {
        let mut sections = self.load_category(category)?;
        let before = sections.len();
        sections.retain(|s| s.id != section_id);
        if sections.len() == before {
            return Ok(false);
        }
        self.save_category(category, &sections)?;
        Ok(true)
    }

    pub fn find_section_by_title(
        &self,
        category: KnowledgeCategory,
        title: &str,
    ) -> Result<Option<KnowledgeSection>> {
        let needle = title.to_lowercase();
        Ok(self
            .load_category(category)?
            .into_iter()
            .find(|s| s.title.to_lowercase() == needle))
    }

    /// Case-insensitive substring search over title, content, and tags.
    pub fn search(&self, query: &str) -> Result<Vec<(KnowledgeCategory, KnowledgeSection)>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for category in KnowledgeCategory::ALL {
            for section in self.load_category(category)? {
                let tag_hit = section
                    .tags
                    .iter()
                    .flatten()
                    .any(|t| t.to_lowercase().contains(&needle));
                if tag_hit
                    || section.title.to_lowercase().contains(&needle)
                    || section.content.to_lowercase().contains(&needle)
                {
                    hits.push((category, section));
                }
            }
        }
        Ok(hits)
    }

    /// Stamp `last_referenced`. Fire-and-forget: a missing section is fine,
    /// write errors are logged and swallowed.
    pub fn record_reference(&self, category: KnowledgeCategory, section_id: &str) {
        let result = self.mutate_section(category, section_id, |section| {
            section.last_referenced = Some(Utc::now());
        });
        match result {
            Ok(_) => {}
            Err(DevlogError::InvalidInput(_)) => {}
            Err(e) => warn!(category = %category, section_id, error = %e, "Failed to record reference"),
        }
    }

    /// Staleness report over every non-canonical section, sorted oldest
    /// first (days descending). Age is measured from `last_confirmed`,
    /// falling back to `last_updated`.
    pub fn find_stale(&self, decay_days: i64, review_days: i64) -> Result<Vec<StaleSection>> {
        let now = Utc::now();
        let mut stale = Vec::new();
        for category in KnowledgeCategory::ALL {
            for section in self.load_category(category)? {
                if section.confidence.is_canonical() {
                    continue;
                }
                let confirmed_at = section.last_confirmed.unwrap_or(section.last_updated);
                let days = now.signed_duration_since(confirmed_at).num_days();
                stale.push(StaleSection {
                    category,
                    section_id: section.id,
                    title: section.title,
                    confidence: section.confidence,
                    days_since_confirmed: days,
                    eligible_for_decay: days >= decay_days,
                    eligible_for_review: days >= review_days,
                });
            }
        }
        stale.sort_by(|a, b| b.days_since_confirmed.cmp(&a.days_since_confirmed));
        Ok(stale)
    }

    /// Apply the decay policy to one staleness entry.
    ///
    /// `established`/`developing` past the decay threshold drop back to
    /// `tentative`. `tentative` past the review threshold is flagged,
    /// preserving the first flag time. Canonical is untouchable.
    pub fn apply_decay(&self, entry: &StaleSection) -> Result<DecayAction> {
        let sections = self.load_category(entry.category)?;
        let Some(section) = sections.iter().find(|s| s.id == entry.section_id) else {
            return Ok(DecayAction::Skipped);
        };

        if section.confidence.is_canonical() {
            return Ok(DecayAction::Skipped);
        }

        match section.confidence {
            Confidence::Established | Confidence::Developing if entry.eligible_for_decay => {
                self.mutate_section(entry.category, &entry.section_id, |s| {
                    s.confidence = Confidence::Tentative;
                })?;
                Ok(DecayAction::Decayed)
            }
            Confidence::Tentative if entry.eligible_for_review => {
                self.mutate_section(entry.category, &entry.section_id, |s| {
                    if s.flagged_for_review.is_none() {
                        s.flagged_for_review = Some(Utc::now());
                    }
                })?;
                Ok(DecayAction::FlaggedForReview)
            }
            _ => Ok(DecayAction::Skipped),
        }
    }

    /// Apply one consolidation decision. Missing preconditions are
    /// `InvalidDecision` errors; unknown actions are a no-op success.
    pub fn apply_decision(
        &self,
        decision: &SessionConsolidationDecision,
    ) -> Result<DecisionOutcome> {
        match decision.action {
            DecisionAction::Skip => Ok(DecisionOutcome {
                action: "skip".into(),
                knowledge_updated: false,
                section_id: None,
            }),

            DecisionAction::CreateSection => {
                let category = require_category(decision)?;
                let new = decision.new_section.clone().ok_or_else(|| {
                    DevlogError::InvalidDecision("create_section requires new_section".into())
                })?;
                if new.title.trim().is_empty() || new.content.trim().is_empty() {
                    return Err(DevlogError::InvalidDecision(
                        "new_section requires title and content".into(),
                    ));
                }
                let section = self.add_section(category, new)?;
                Ok(DecisionOutcome {
                    action: "create_section".into(),
                    knowledge_updated: true,
                    section_id: Some(section.id),
                })
            }

            DecisionAction::ExtendSection => {
                let category = require_category(decision)?;
                let section_id = require_section_id(decision)?;
                let additional = decision
                    .extension
                    .as_ref()
                    .and_then(|e| e.additional_content.as_deref())
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        DevlogError::InvalidDecision(
                            "extend_section requires extension.additional_content".into(),
                        )
                    })?;

                let sections = self.load_category(category)?;
                let existing = sections
                    .iter()
                    .find(|s| s.id == section_id)
                    .ok_or_else(|| {
                        DevlogError::InvalidDecision(format!(
                            "extend_section targets missing section {section_id}"
                        ))
                    })?;
                let content = format!("{}\n\n{}", existing.content, additional);
                let updated = self.update_section(
                    category,
                    section_id,
                    SectionUpdate {
                        content: Some(content),
                        ..Default::default()
                    },
                )?;
                Ok(DecisionOutcome {
                    action: "extend_section".into(),
                    knowledge_updated: true,
                    section_id: Some(updated.id),
                })
            }

            DecisionAction::AddExample => {
                let category = require_category(decision)?;
                let section_id = require_section_id(decision)?;
                let new_examples = decision
                    .extension
                    .as_ref()
                    .and_then(|e| e.new_examples.clone())
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| {
                        DevlogError::InvalidDecision(
                            "add_example requires extension.new_examples".into(),
                        )
                    })?;

                let sections = self.load_category(category)?;
                let existing = sections
                    .iter()
                    .find(|s| s.id == section_id)
                    .ok_or_else(|| {
                        DevlogError::InvalidDecision(format!(
                            "add_example targets missing section {section_id}"
                        ))
                    })?;
                let mut examples = existing.examples.clone().unwrap_or_default();
                examples.extend(new_examples);
                let updated = self.update_section(
                    category,
                    section_id,
                    SectionUpdate {
                        examples: Some(examples),
                        ..Default::default()
                    },
                )?;
                Ok(DecisionOutcome {
                    action: "add_example".into(),
                    knowledge_updated: true,
                    section_id: Some(updated.id),
                })
            }

            DecisionAction::ConfirmPattern => {
                let category = require_category(decision)?;
                let section_id = require_section_id(decision)?;
                let updated = self.confirm_section(category, section_id)?;
                Ok(DecisionOutcome {
                    action: "confirm_pattern".into(),
                    knowledge_updated: true,
                    section_id: Some(updated.id),
                })
            }

            DecisionAction::FlagContradiction => {
                tracing::info!(
                    reasoning = decision.reasoning.as_deref().unwrap_or("(none)"),
                    "Session contradicts recorded knowledge; leaving store untouched"
                );
                Ok(DecisionOutcome {
                    action: "flag_contradiction".into(),
                    knowledge_updated: false,
                    section_id: None,
                })
            }

            DecisionAction::Unknown => Ok(DecisionOutcome {
                action: "unknown".into(),
                knowledge_updated: false,
                section_id: None,
            }),
        }
    }
}

fn require_category(decision: &SessionConsolidationDecision) -> Result<KnowledgeCategory> {
    decision.category.ok_or_else(|| {
        DevlogError::InvalidDecision(format!("{:?} requires a category", decision.action))
    })
}

fn require_section_id(decision: &SessionConsolidationDecision) -> Result<&str> {
    decision.section_id.as_deref().ok_or_else(|| {
        DevlogError::InvalidDecision(format!("{:?} requires a section_id", decision.action))
    })
}
