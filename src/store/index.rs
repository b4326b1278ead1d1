// src/store/index.rs
// Auto-generated <memory>/index.md table of contents over the knowledge
// files. Regenerated from store state, so repeated runs are idempotent.

use crate::error::StorageError;
use crate::store::knowledge::{KnowledgeCategory, KnowledgeStore};
use crate::Result;
use std::path::Path;

/// Rewrite `<memory>/index.md` from the current knowledge store contents.
pub fn update_index(project_path: &Path) -> Result<()> {
    let store = KnowledgeStore::new(project_path);

    let mut out = String::new();
    out.push_str("# Project knowledge index\n");
    out.push_str("\nGenerated by devlog; edits here are overwritten.\n");

    let mut latest = None;
    for category in KnowledgeCategory::ALL {
        let sections = store.load_category(category)?;
        out.push_str(&format!(
            "\n## {} ({})\n\n",
            category.as_str(),
            sections.len()
        ));
        if sections.is_empty() {
            out.push_str("_No sections yet._\n");
            continue;
        }
        for section in &sections {
            out.push_str(&format!(
                "- [{}] {} - {} ({} observation{})\n",
                section.id,
                section.title,
                section.confidence,
                section.observations,
                if section.observations == 1 { "" } else { "s" }
            ));
            latest = latest.max(Some(section.last_updated));
        }
    }

    if let Some(ts) = latest {
        out.push_str(&format!("\n_Last knowledge update: {}_\n", ts.to_rfc3339()));
    }

    let path = crate::paths::index_file(project_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::write(&path, e))?;
    }
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, out).map_err(|e| StorageError::write(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| StorageError::write(&path, e))?;
    Ok(())
}
