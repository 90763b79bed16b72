use rusqlite::types::Value as SqlValue;

use super::{QueryFilter, decode_rows};
use crate::decision::Decision;
use crate::error::{LedgerError, Result};
use crate::index::SqliteIndex;

/// FTS5 search over id, problem, choice and rationale, best match first.
///
/// Any engine error on the FTS path (typically query syntax such as a bare
/// `/` or an unbalanced quote) drops to a case-sensitive substring scan of
/// problem/choice/rationale with the same filter and limit, newest first.
pub fn full_text_search(
    index: &SqliteIndex,
    text: &str,
    filter: QueryFilter,
) -> Result<Vec<Decision>> {
    match fts_match(index, text, filter) {
        Err(LedgerError::Sqlite(err)) => {
            tracing::debug!(query = text, error = %err, "fts query failed; falling back to substring scan");
            substring_scan(index, text, filter)
        }
        other => other,
    }
}

fn fts_match(index: &SqliteIndex, text: &str, filter: QueryFilter) -> Result<Vec<Decision>> {
    let mut sql = String::from(
        "SELECT d.raw_json FROM decisions_fts
         JOIN decisions d ON d.rowid = decisions_fts.rowid
         WHERE decisions_fts MATCH ?",
    );
    let mut params = vec![SqlValue::Text(text.to_string())];
    filter.push_conditions(&mut sql, &mut params);
    sql.push_str(" ORDER BY decisions_fts.rank");
    filter.push_limit(&mut sql, &mut params);
    decode_rows(index, &sql, params)
}

fn substring_scan(index: &SqliteIndex, text: &str, filter: QueryFilter) -> Result<Vec<Decision>> {
    let mut sql = String::from(
        "SELECT d.raw_json FROM decisions d
         WHERE (instr(d.problem, ?) > 0
             OR instr(d.choice, ?) > 0
             OR instr(COALESCE(d.rationale, ''), ?) > 0)",
    );
    let needle = SqlValue::Text(text.to_string());
    let mut params = vec![needle.clone(), needle.clone(), needle];
    filter.push_conditions(&mut sql, &mut params);
    sql.push_str(" ORDER BY d.created_at DESC");
    filter.push_limit(&mut sql, &mut params);
    decode_rows(index, &sql, params)
}
