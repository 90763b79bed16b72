//! Housekeeping reads over active decisions: dangling file references and
//! candidates for summarisation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::decision::{Decision, DecisionType};
use crate::error::{LedgerError, Result};
use crate::index::SqliteIndex;
use crate::query::{self, QueryFilter};

pub const FILE_NOT_FOUND: &str = "file not found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub decision_id: String,
    pub file_path: String,
    pub issue: String,
}

/// Every file of an active decision that no longer exists under `root`.
/// Entries containing `*` are expanded and reported only when nothing matches.
pub fn validate_file_refs(index: &SqliteIndex, root: &Path) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    for decision in query::all(index, QueryFilter::active())? {
        for file in &decision.files {
            if !reference_exists(root, file)? {
                issues.push(ValidationIssue {
                    decision_id: decision.id.clone(),
                    file_path: file.clone(),
                    issue: FILE_NOT_FOUND.to_string(),
                });
            }
        }
    }
    Ok(issues)
}

fn reference_exists(root: &Path, file: &str) -> Result<bool> {
    if !file.contains('*') {
        return Ok(root.join(file).exists());
    }
    // Only the decision's entry is a pattern; the root is matched literally.
    let escaped_root = PathBuf::from(glob::Pattern::escape(&root.to_string_lossy()));
    let pattern = escaped_root.join(file);
    let mut matches =
        glob::glob(&pattern.to_string_lossy()).map_err(|err| LedgerError::InvalidPattern {
            pattern: file.to_string(),
            reason: err.msg.to_string(),
        })?;
    Ok(matches.any(|entry| entry.is_ok()))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CurateFilter {
    pub older_than_days: Option<u32>,
    pub decision_type: Option<DecisionType>,
    pub file_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurationCandidate {
    pub decision: Decision,
    pub age_days: i64,
    pub related_count: usize,
}

/// Active decisions worth summarising, newest first.
pub fn curate(
    index: &SqliteIndex,
    filter: &CurateFilter,
    now: DateTime<Utc>,
) -> Result<Vec<CurationCandidate>> {
    let pattern = filter
        .file_pattern
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            glob::Pattern::new(raw).map_err(|err| LedgerError::InvalidPattern {
                pattern: raw.to_string(),
                reason: err.msg.to_string(),
            })
        })
        .transpose()?;
    let cutoff = match filter.older_than_days.filter(|days| *days > 0) {
        Some(days) => match now.checked_sub_signed(Duration::days(i64::from(days))) {
            Some(cutoff) => Some(cutoff),
            // Earlier than any representable timestamp, so nothing qualifies.
            None => return Ok(Vec::new()),
        },
        None => None,
    };

    let decisions = query::all(
        index,
        QueryFilter {
            decision_type: filter.decision_type,
            ..QueryFilter::active()
        },
    )?;

    let mut candidates = Vec::new();
    for decision in decisions {
        let created = match DateTime::parse_from_rfc3339(&decision.created_at) {
            Ok(created) => created.with_timezone(&Utc),
            Err(err) => {
                tracing::warn!(id = %decision.id, error = %err, "skipping decision with unparsable created_at");
                continue;
            }
        };
        if cutoff.is_some_and(|cutoff| created > cutoff) {
            continue;
        }
        if let Some(pattern) = &pattern {
            if !decision.files.iter().any(|file| pattern.matches(file)) {
                continue;
            }
        }
        candidates.push(CurationCandidate {
            age_days: (now - created).num_days(),
            related_count: decision.files.len() + decision.refs.len(),
            decision,
        });
    }
    Ok(candidates)
}
