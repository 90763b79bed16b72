//! Typed reads over the index. Every query decodes the canonical `raw_json`
//! payload; the relational columns are only used to filter and join.

pub mod search;

use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, params, params_from_iter};
use serde::Serialize;

use crate::decision::{Decision, DecisionStatus, DecisionType};
use crate::error::Result;
use crate::index::SqliteIndex;

pub use search::full_text_search;

/// Optional narrowing shared by `all` and full-text search. Unset fields are
/// ignored; a `limit` of zero means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryFilter {
    pub decision_type: Option<DecisionType>,
    pub status: Option<DecisionStatus>,
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn active() -> Self {
        Self {
            status: Some(DecisionStatus::Active),
            ..Self::default()
        }
    }

    /// Appends ` AND ...` clauses for `d.type`/`d.status` and pushes their
    /// parameters.
    pub(crate) fn push_conditions(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        if let Some(kind) = self.decision_type {
            sql.push_str(" AND d.type = ?");
            params.push(SqlValue::Text(kind.as_str().to_string()));
        }
        if let Some(status) = self.status {
            sql.push_str(" AND d.status = ?");
            params.push(SqlValue::Text(status.as_str().to_string()));
        }
    }

    pub(crate) fn push_limit(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
    }
}

/// What affects a path: decisions touching it plus every active constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextResult {
    pub decisions: Vec<Decision>,
    pub constraints: Vec<Decision>,
}

pub fn by_id(index: &SqliteIndex, id: &str) -> Result<Option<Decision>> {
    let raw: Option<String> = index
        .conn()
        .query_row(
            "SELECT raw_json FROM decisions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    raw.as_deref().map(Decision::from_json).transpose()
}

/// Active decisions with a file association matching `path_or_glob`. `*`
/// matches any run of characters, `/` included; matching is ASCII
/// case-insensitive.
pub fn by_file(index: &SqliteIndex, path_or_glob: &str) -> Result<Vec<Decision>> {
    decode_rows(
        index,
        "SELECT d.raw_json FROM decisions d
         WHERE d.status = 'active'
           AND d.id IN (
               SELECT decision_id FROM decision_files WHERE file_path LIKE ?1 ESCAPE '\\'
           )
         ORDER BY d.created_at DESC",
        vec![SqlValue::Text(glob_to_like(path_or_glob))],
    )
}

pub fn by_symbol(index: &SqliteIndex, symbol: &str) -> Result<Vec<Decision>> {
    by_association(index, "decision_symbols", "symbol", symbol)
}

pub fn by_ref(index: &SqliteIndex, ref_id: &str) -> Result<Vec<Decision>> {
    by_association(index, "decision_refs", "ref_id", ref_id)
}

fn by_association(
    index: &SqliteIndex,
    table: &str,
    column: &str,
    value: &str,
) -> Result<Vec<Decision>> {
    let sql = format!(
        "SELECT d.raw_json FROM decisions d
         WHERE d.status = 'active'
           AND d.id IN (SELECT decision_id FROM {table} WHERE {column} = ?1)
         ORDER BY d.created_at DESC"
    );
    decode_rows(index, &sql, vec![SqlValue::Text(value.to_string())])
}

pub fn all(index: &SqliteIndex, filter: QueryFilter) -> Result<Vec<Decision>> {
    let mut sql = String::from("SELECT d.raw_json FROM decisions d WHERE 1 = 1");
    let mut params = Vec::new();
    filter.push_conditions(&mut sql, &mut params);
    sql.push_str(" ORDER BY d.created_at DESC");
    filter.push_limit(&mut sql, &mut params);
    decode_rows(index, &sql, params)
}

pub fn active_constraints(index: &SqliteIndex) -> Result<Vec<Decision>> {
    all(
        index,
        QueryFilter {
            decision_type: Some(DecisionType::Constraint),
            ..QueryFilter::active()
        },
    )
}

pub fn for_context(index: &SqliteIndex, path: &str) -> Result<ContextResult> {
    Ok(ContextResult {
        decisions: by_file(index, path)?,
        constraints: active_constraints(index)?,
    })
}

pub(crate) fn decode_rows(
    index: &SqliteIndex,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<Vec<Decision>> {
    let mut stmt = index.conn().prepare(sql)?;
    let raws = stmt
        .query_map(params_from_iter(params), |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.iter().map(|raw| Decision::from_json(raw)).collect()
}

fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(ch);
            }
            '*' => out.push('%'),
            other => out.push(other),
        }
    }
    out
}
