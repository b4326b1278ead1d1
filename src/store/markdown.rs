// src/store/markdown.rs
// Round-trip serialization for knowledge category files: YAML front-matter,
// one "## [id] Title" block per section, bolded-key field lines. The format
// is fixed for compatibility with existing on-disk stores.

use crate::error::StorageError;
use crate::store::knowledge::{Confidence, KnowledgeCategory, KnowledgeSection};
use crate::{DevlogError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;
use std::str::FromStr;

const EXAMPLES_HEADING: &str = "### Examples";

/// Render a category file: front-matter summary plus every section, in order,
/// separated by horizontal rules.
pub fn render_category(category: KnowledgeCategory, sections: &[KnowledgeSection]) -> String {
    let last_updated = sections
        .iter()
        .map(|s| s.last_updated)
        .max()
        .unwrap_or_else(Utc::now);

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("category: {}\n", category.as_str()));
    out.push_str(&format!("sectionCount: {}\n", sections.len()));
    out.push_str(&format!("lastUpdated: {}\n", last_updated.to_rfc3339()));
    out.push_str("---\n");

    for section in sections {
        out.push('\n');
        out.push_str(&render_section(section));
        out.push_str("\n---\n");
    }
    out
}

fn render_section(section: &KnowledgeSection) -> String {
    let mut out = String::new();
    out.push_str(&format!("## [{}] {}\n\n", section.id, section.title));
    out.push_str(section.content.trim_end());
    out.push('\n');

    if let Some(examples) = &section.examples
        && !examples.is_empty()
    {
        out.push('\n');
        out.push_str(EXAMPLES_HEADING);
        out.push('\n');
        for example in examples {
            out.push_str(&format!("- {example}\n"));
        }
    }

    out.push('\n');
    out.push_str(&format!("**Confidence**: {}\n", section.confidence));
    out.push_str(&format!(
        "**First observed**: {}\n",
        section.first_observed.format("%Y-%m-%d")
    ));
    out.push_str(&format!(
        "**Last updated**: {}\n",
        section.last_updated.to_rfc3339()
    ));
    out.push_str(&format!("**Observations**: {}\n", section.observations));
    if let Some(files) = &section.related_files
        && !files.is_empty()
    {
        let list = files
            .iter()
            .map(|f| format!("`{f}`"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("**Related files**: {list}\n"));
    }
    if let Some(tags) = &section.tags
        && !tags.is_empty()
    {
        out.push_str(&format!("**Tags**: {}\n", tags.join(", ")));
    }
    if let Some(ts) = section.last_referenced {
        out.push_str(&format!("**Last referenced**: {}\n", ts.to_rfc3339()));
    }
    if let Some(ts) = section.last_confirmed {
        out.push_str(&format!("**Last confirmed**: {}\n", ts.to_rfc3339()));
    }
    if let Some(ts) = section.flagged_for_review {
        out.push_str(&format!("**Flagged for review**: {}\n", ts.to_rfc3339()));
    }
    out
}

/// Parse a category file back into sections.
///
/// Tolerant of missing optional fields; unknown bold-key lines are kept as
/// content so hand edits survive a rewrite cycle.
pub fn parse_category(path: &Path, contents: &str) -> Result<Vec<KnowledgeSection>> {
    let body = skip_front_matter(contents);

    let mut sections = Vec::new();
    let mut current: Option<SectionBuilder> = None;

    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("## [") {
            if let Some(section) = current.take() {
                sections.push(section.build(path)?);
            }
            let Some((id, title)) = rest.split_once(']') else {
                return Err(StorageError::parse(
                    path,
                    format!("malformed section heading: {line:?}"),
                )
                .into());
            };
            current = Some(SectionBuilder::new(
                id.trim().to_string(),
                title.trim().to_string(),
            ));
            continue;
        }

        let Some(builder) = current.as_mut() else {
            continue;
        };
        builder.feed(line);
    }

    if let Some(section) = current.take() {
        sections.push(section.build(path)?);
    }
    Ok(sections)
}

fn skip_front_matter(contents: &str) -> &str {
    let trimmed = contents.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return contents;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + "\n---".len()..];
            after.strip_prefix('\n').unwrap_or(after)
        }
        None => contents,
    }
}

struct SectionBuilder {
    id: String,
    title: String,
    content_lines: Vec<String>,
    examples: Vec<String>,
    in_examples: bool,
    confidence: Option<String>,
    first_observed: Option<String>,
    last_updated: Option<String>,
    observations: Option<String>,
    related_files: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    last_referenced: Option<String>,
    last_confirmed: Option<String>,
    flagged_for_review: Option<String>,
}

impl SectionBuilder {
    fn new(id: String, title: String) -> Self {
        Self {
            id,
            title,
            content_lines: Vec::new(),
            examples: Vec::new(),
            in_examples: false,
            confidence: None,
            first_observed: None,
            last_updated: None,
            observations: None,
            related_files: None,
            tags: None,
            last_referenced: None,
            last_confirmed: None,
            flagged_for_review: None,
        }
    }

    fn feed(&mut self, line: &str) {
        if line.trim() == "---" {
            return;
        }
        if line.trim() == EXAMPLES_HEADING {
            self.in_examples = true;
            return;
        }
        if let Some((key, value)) = parse_field_line(line) {
            self.in_examples = false;
            let value = value.trim().to_string();
            match key {
                "Confidence" => self.confidence = Some(value),
                "First observed" => self.first_observed = Some(value),
                "Last updated" => self.last_updated = Some(value),
                "Observations" => self.observations = Some(value),
                "Related files" => {
                    self.related_files = Some(
                        value
                            .split(',')
                            .map(|f| f.trim().trim_matches('`').to_string())
                            .filter(|f| !f.is_empty())
                            .collect(),
                    );
                }
                "Tags" => {
                    self.tags = Some(
                        value
                            .split(',')
                            .map(|t| t.trim().to_string())
                            .filter(|t| !t.is_empty())
                            .collect(),
                    );
                }
                "Last referenced" => self.last_referenced = Some(value),
                "Last confirmed" => self.last_confirmed = Some(value),
                "Flagged for review" => self.flagged_for_review = Some(value),
                _ => self.content_lines.push(line.to_string()),
            }
            return;
        }
        if self.in_examples {
            if let Some(item) = line.trim().strip_prefix("- ") {
                self.examples.push(item.trim().to_string());
            }
            return;
        }
        self.content_lines.push(line.to_string());
    }

    fn build(self, path: &Path) -> Result<KnowledgeSection> {
        let confidence = match self.confidence.as_deref() {
            Some(raw) => Confidence::from_str(raw)
                .map_err(|e| DevlogError::from(StorageError::parse(path, e)))?,
            None => Confidence::Tentative,
        };
        let first_observed = match self.first_observed.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| DevlogError::from(StorageError::parse(path, e)))?,
            None => Utc::now().date_naive(),
        };
        let last_updated = match self.last_updated.as_deref() {
            Some(raw) => parse_timestamp(path, raw)?,
            None => Utc::now(),
        };
        let observations = match self.observations.as_deref() {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|e| DevlogError::from(StorageError::parse(path, e)))?,
            None => 1,
        };

        Ok(KnowledgeSection {
            id: self.id,
            title: self.title,
            content: self.content_lines.join("\n").trim().to_string(),
            confidence,
            first_observed,
            last_updated,
            observations,
            tags: self.tags,
            examples: if self.examples.is_empty() {
                None
            } else {
                Some(self.examples)
            },
            related_files: self.related_files,
            last_referenced: parse_opt_timestamp(path, self.last_referenced.as_deref())?,
            last_confirmed: parse_opt_timestamp(path, self.last_confirmed.as_deref())?,
            flagged_for_review: parse_opt_timestamp(path, self.flagged_for_review.as_deref())?,
        })
    }
}

fn parse_field_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("**")?;
    let (key, value) = rest.split_once("**:")?;
    Some((key, value))
}

fn parse_timestamp(path: &Path, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::parse(path, format!("bad timestamp {raw:?}: {e}")).into())
}

fn parse_opt_timestamp(path: &Path, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_timestamp(path, r)).transpose()
}
