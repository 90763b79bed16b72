//! The write path and the read facade the CLI drives.
//!
//! Writes go log first, index second, with no transaction spanning the two.
//! If indexing fails after an append, the log is already correct and the next
//! open rebuilds the index from it.

use std::fs;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{LedgerPaths, default_repo_config_yaml};
use crate::decision::{DecidedBy, Decision, DecisionInput};
use crate::error::{LedgerError, Result};
use crate::id::{HashIdGenerator, IdGenerator, normalize_id};
use crate::index::{RebuildStats, SqliteIndex};
use crate::query::{self, ContextResult, QueryFilter};
use crate::review::{self, CurateFilter, CurationCandidate, ValidationIssue};
use crate::store::LogStore;

/// Creates `.keel/` with an empty log, a default repo config and a built
/// index. Existing files are left alone; returns false if the ledger was
/// already initialized.
pub fn init(paths: &LedgerPaths) -> Result<bool> {
    let fresh = !paths.is_initialized();
    fs::create_dir_all(&paths.keel_dir).map_err(|err| LedgerError::io(&paths.keel_dir, err))?;
    LogStore::for_paths(paths).ensure_exists()?;
    if !paths.repo_config.exists() {
        fs::write(&paths.repo_config, default_repo_config_yaml())
            .map_err(|err| LedgerError::io(&paths.repo_config, err))?;
    }
    SqliteIndex::open(paths)?;
    Ok(fresh)
}

/// Fields for a replacement decision. Unset fields fall back to the
/// decision being replaced; the type is always inherited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersedeInput {
    pub choice: String,
    pub problem: Option<String>,
    pub rationale: Option<String>,
    pub files: Option<Vec<String>>,
    pub symbols: Option<Vec<String>>,
    pub refs: Option<Vec<String>>,
    pub decided_by: Option<DecidedBy>,
}

impl SupersedeInput {
    pub fn new(choice: impl Into<String>) -> Self {
        Self {
            choice: choice.into(),
            problem: None,
            rationale: None,
            files: None,
            symbols: None,
            refs: None,
            decided_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupersedeOutcome {
    pub decision: Decision,
    pub superseded: Decision,
}

pub struct Ledger {
    paths: LedgerPaths,
    index: SqliteIndex,
    ids: Box<dyn IdGenerator>,
}

impl Ledger {
    pub fn open(paths: LedgerPaths) -> Result<Self> {
        let index = SqliteIndex::open(&paths)?;
        Ok(Self {
            paths,
            index,
            ids: Box::new(HashIdGenerator),
        })
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    pub fn index(&self) -> &SqliteIndex {
        &self.index
    }

    /// Records a new decision. With `supersedes` set, the referenced decision
    /// must exist and be active, and is retired once the new one is written.
    pub fn decide(&self, mut input: DecisionInput) -> Result<Decision> {
        input.validate()?;
        let predecessor = match input.supersedes.take() {
            Some(raw) => {
                let old = self.load_active(&raw)?;
                input.supersedes = Some(old.id.clone());
                Some(old)
            }
            None => None,
        };

        let decision = self.record(input)?;
        if let Some(old) = predecessor {
            self.retire(old, &decision.id)?;
        }
        Ok(decision)
    }

    pub fn supersede(&self, old_id: &str, input: SupersedeInput) -> Result<SupersedeOutcome> {
        let old = self.load_active(old_id)?;
        let replacement = DecisionInput {
            decision_type: old.decision_type,
            problem: input.problem.unwrap_or_else(|| old.problem.clone()),
            choice: input.choice,
            rationale: input.rationale,
            tradeoffs: Vec::new(),
            decided_by: input.decided_by,
            files: input.files.unwrap_or_else(|| old.files.clone()),
            symbols: input.symbols.unwrap_or_else(|| old.symbols.clone()),
            refs: input.refs.unwrap_or_else(|| old.refs.clone()),
            hypothesis: None,
            success_criteria: None,
            supersedes: Some(old.id.clone()),
        };
        replacement.validate()?;

        let decision = self.record(replacement)?;
        let superseded = self.retire(old, &decision.id)?;
        Ok(SupersedeOutcome {
            decision,
            superseded,
        })
    }

    fn load_active(&self, raw_id: &str) -> Result<Decision> {
        let id = normalize_id(raw_id)?;
        let decision = query::by_id(&self.index, &id)?.ok_or_else(|| LedgerError::NotFound(id))?;
        if decision.is_active() {
            return Ok(decision);
        }
        Err(LedgerError::AlreadySuperseded {
            by: decision
                .superseded_by
                .unwrap_or_else(|| "an unknown decision".to_string()),
            id: decision.id,
        })
    }

    /// Step one: the replacement (or plain new decision) goes in active.
    fn record(&self, input: DecisionInput) -> Result<Decision> {
        let id = self.ids.generate(&input.problem, &input.choice);
        let decision = Decision::new(id, input, Utc::now());
        self.index.log().append(&decision)?;
        self.index.index_one(&decision)?;
        tracing::info!(id = %decision.id, kind = %decision.decision_type, "recorded decision");
        Ok(decision)
    }

    /// Step two: a new line for the old id marks it superseded.
    fn retire(&self, mut old: Decision, successor: &str) -> Result<Decision> {
        old.mark_superseded(successor);
        self.index.log().append(&old)?;
        self.index.index_one(&old)?;
        tracing::info!(id = %old.id, superseded_by = successor, "superseded decision");
        Ok(old)
    }

    /// Accepts any spelling `normalize_id` does.
    pub fn why(&self, raw_id: &str) -> Result<Option<Decision>> {
        let id = normalize_id(raw_id)?;
        query::by_id(&self.index, &id)
    }

    /// Decisions for a path, falling back to a symbol lookup of the same
    /// input when no file association matches.
    pub fn context(&self, path: &str) -> Result<ContextResult> {
        let mut result = query::for_context(&self.index, path)?;
        if result.decisions.is_empty() {
            result.decisions = query::by_symbol(&self.index, path)?;
        }
        Ok(result)
    }

    pub fn context_for_ref(&self, ref_id: &str) -> Result<ContextResult> {
        Ok(ContextResult {
            decisions: query::by_ref(&self.index, ref_id)?,
            constraints: query::active_constraints(&self.index)?,
        })
    }

    /// Full-text search, or a filtered listing when `text` is empty.
    pub fn search(&self, text: Option<&str>, filter: QueryFilter) -> Result<Vec<Decision>> {
        match text.map(str::trim).filter(|text| !text.is_empty()) {
            Some(text) => query::full_text_search(&self.index, text, filter),
            None => query::all(&self.index, filter),
        }
    }

    pub fn rebuild(&self) -> Result<RebuildStats> {
        self.index.rebuild()
    }

    pub fn validate(&self) -> Result<Vec<ValidationIssue>> {
        review::validate_file_refs(&self.index, &self.paths.root)
    }

    pub fn curate(
        &self,
        filter: &CurateFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<CurationCandidate>> {
        review::curate(&self.index, filter, now)
    }
}
