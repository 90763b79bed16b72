//! Disposable SQLite projection of the decision log, `.keel/index.sqlite`.
//!
//! One row per current decision plus file/symbol/ref association tables and
//! an FTS5 mirror of the text columns. The `raw_json` column holds the
//! canonical record; every other column exists to filter and join on.

use std::fs;

use rusqlite::{Connection, OptionalExtension, params};

use crate::config::LedgerPaths;
use crate::decision::Decision;
use crate::error::{LedgerError, Result};
use crate::store::{LatestState, LogStore, Watermark};

pub const SCHEMA_VERSION: i64 = 1;
pub const WATERMARK_MTIME_KEY: &str = "jsonl_mtime";
pub const WATERMARK_SIZE_KEY: &str = "jsonl_size";

const ASSOCIATIONS: [(&str, &str); 3] = [
    ("decision_files", "file_path"),
    ("decision_symbols", "symbol"),
    ("decision_refs", "ref_id"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildStats {
    /// Log lines that parsed; skipped corrupt lines are not counted.
    pub snapshots_read: usize,
    pub decisions_indexed: usize,
}

pub struct SqliteIndex {
    conn: Connection,
    log: LogStore,
}

impl SqliteIndex {
    /// Opens (creating if needed) the index for a ledger and brings it in
    /// line with the log before returning.
    pub fn open(paths: &LedgerPaths) -> Result<Self> {
        fs::create_dir_all(&paths.keel_dir).map_err(|err| LedgerError::io(&paths.keel_dir, err))?;
        let conn = Connection::open(&paths.index)?;
        Self::from_connection(conn, LogStore::for_paths(paths))
    }

    pub fn open_in_memory(log: LogStore) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, log)
    }

    fn from_connection(conn: Connection, log: LogStore) -> Result<Self> {
        let index = Self { conn, log };
        index.init_schema()?;
        if index.is_stale()? {
            let stats = index.rebuild()?;
            tracing::debug!(
                snapshots = stats.snapshots_read,
                decisions = stats.decisions_indexed,
                "index was stale; rebuilt from log"
            );
        }
        Ok(index)
    }

    fn init_schema(&self) -> Result<()> {
        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => {
                // Also adopts indexes written before versioning; every
                // statement is IF NOT EXISTS.
                self.create_schema_v1()?;
                self.conn
                    .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
            }
            SCHEMA_VERSION => self.create_schema_v1()?,
            newer => return Err(LedgerError::UnsupportedIndexVersion(newer)),
        }
        Ok(())
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                type TEXT NOT NULL,
                problem TEXT NOT NULL,
                choice TEXT NOT NULL,
                rationale TEXT,
                decided_by_role TEXT NOT NULL,
                decided_by_identifier TEXT,
                status TEXT NOT NULL,
                supersedes TEXT,
                superseded_by TEXT,
                raw_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decision_files (
                decision_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                PRIMARY KEY (decision_id, file_path)
            );
            CREATE INDEX IF NOT EXISTS idx_files_path ON decision_files(file_path);

            CREATE TABLE IF NOT EXISTS decision_symbols (
                decision_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                PRIMARY KEY (decision_id, symbol)
            );
            CREATE INDEX IF NOT EXISTS idx_symbols_name ON decision_symbols(symbol);

            CREATE TABLE IF NOT EXISTS decision_refs (
                decision_id TEXT NOT NULL,
                ref_id TEXT NOT NULL,
                PRIMARY KEY (decision_id, ref_id)
            );
            CREATE INDEX IF NOT EXISTS idx_refs_id ON decision_refs(ref_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS decisions_fts USING fts5(
                id,
                problem,
                choice,
                rationale,
                content='decisions',
                content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS decisions_ai AFTER INSERT ON decisions BEGIN
                INSERT INTO decisions_fts(rowid, id, problem, choice, rationale)
                VALUES (NEW.rowid, NEW.id, NEW.problem, NEW.choice, NEW.rationale);
            END;

            CREATE TRIGGER IF NOT EXISTS decisions_ad AFTER DELETE ON decisions BEGIN
                INSERT INTO decisions_fts(decisions_fts, rowid, id, problem, choice, rationale)
                VALUES ('delete', OLD.rowid, OLD.id, OLD.problem, OLD.choice, OLD.rationale);
            END;

            CREATE TRIGGER IF NOT EXISTS decisions_au AFTER UPDATE ON decisions BEGIN
                INSERT INTO decisions_fts(decisions_fts, rowid, id, problem, choice, rationale)
                VALUES ('delete', OLD.rowid, OLD.id, OLD.problem, OLD.choice, OLD.rationale);
                INSERT INTO decisions_fts(rowid, id, problem, choice, rationale)
                VALUES (NEW.rowid, NEW.id, NEW.problem, NEW.choice, NEW.rationale);
            END;

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn log(&self) -> &LogStore {
        &self.log
    }

    /// The index is stale when the log exists and its size or mtime differs
    /// from what the index last recorded, or nothing was recorded yet.
    pub fn is_stale(&self) -> Result<bool> {
        let Some(current) = self.log.watermark()? else {
            return Ok(false);
        };
        Ok(self.stored_watermark()? != Some(current))
    }

    pub fn stored_watermark(&self) -> Result<Option<Watermark>> {
        let mtime = self.metadata_value(WATERMARK_MTIME_KEY)?;
        let size = self.metadata_value(WATERMARK_SIZE_KEY)?;
        let parsed = match (mtime, size) {
            (Some(mtime), Some(size)) => match (mtime.parse(), size.parse()) {
                (Ok(mtime_nanos), Ok(size)) => Some(Watermark { mtime_nanos, size }),
                _ => None,
            },
            _ => None,
        };
        Ok(parsed)
    }

    fn metadata_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upserts one decision and grows its associations, then records the
    /// log's current watermark. Call after the matching line was appended.
    pub fn index_one(&self, decision: &Decision) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::upsert_on(&tx, decision)?;
        self.write_watermark_on(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Drops every row and re-derives the index from a full log scan.
    pub fn rebuild(&self) -> Result<RebuildStats> {
        // Stat before reading, so a line appended mid-rebuild leaves the
        // index stale rather than silently missing it.
        let watermark = self.log.watermark()?;
        let snapshots = self.log.read_all()?;
        let snapshots_read = snapshots.len();
        let state = LatestState::from_snapshots(snapshots);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "
            DELETE FROM decision_files;
            DELETE FROM decision_symbols;
            DELETE FROM decision_refs;
            DELETE FROM decisions;
            ",
        )?;
        for decision in state.iter() {
            Self::upsert_on(&tx, decision)?;
        }
        tx.execute_batch("INSERT INTO decisions_fts(decisions_fts) VALUES ('rebuild');")?;
        match watermark {
            Some(watermark) => Self::store_watermark_on(&tx, watermark)?,
            None => {
                tx.execute(
                    "DELETE FROM metadata WHERE key IN (?1, ?2)",
                    params![WATERMARK_MTIME_KEY, WATERMARK_SIZE_KEY],
                )?;
            }
        }
        tx.commit()?;

        Ok(RebuildStats {
            snapshots_read,
            decisions_indexed: state.len(),
        })
    }

    pub fn decision_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn upsert_on(conn: &Connection, decision: &Decision) -> Result<()> {
        let raw_json = decision.to_json()?;
        conn.execute(
            "INSERT INTO decisions (
                id, created_at, type, problem, choice, rationale,
                decided_by_role, decided_by_identifier, status,
                supersedes, superseded_by, raw_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                type = excluded.type,
                problem = excluded.problem,
                choice = excluded.choice,
                rationale = excluded.rationale,
                decided_by_role = excluded.decided_by_role,
                decided_by_identifier = excluded.decided_by_identifier,
                status = excluded.status,
                supersedes = excluded.supersedes,
                superseded_by = excluded.superseded_by,
                raw_json = excluded.raw_json",
            params![
                decision.id,
                decision.created_at,
                decision.decision_type.as_str(),
                decision.problem,
                decision.choice,
                decision.rationale,
                decision.decided_by.role.as_str(),
                decision.decided_by.identifier,
                decision.status.as_str(),
                decision.supersedes,
                decision.superseded_by,
                raw_json
            ],
        )?;

        let values: [&[String]; 3] = [&decision.files, &decision.symbols, &decision.refs];
        for (&(table, column), values) in ASSOCIATIONS.iter().zip(values) {
            let sql = format!("INSERT OR IGNORE INTO {table} (decision_id, {column}) VALUES (?1, ?2)");
            for value in values {
                if let Err(err) = conn.execute(&sql, params![decision.id, value]) {
                    tracing::warn!(
                        id = %decision.id,
                        table,
                        value = %value,
                        error = %err,
                        "failed to index association; continuing"
                    );
                }
            }
        }
        Ok(())
    }

    fn write_watermark_on(&self, conn: &Connection) -> Result<()> {
        if let Some(watermark) = self.log.watermark()? {
            Self::store_watermark_on(conn, watermark)?;
        }
        Ok(())
    }

    fn store_watermark_on(conn: &Connection, watermark: Watermark) -> Result<()> {
        let mut stmt =
            conn.prepare("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params![WATERMARK_MTIME_KEY, watermark.mtime_nanos.to_string()])?;
        stmt.execute(params![WATERMARK_SIZE_KEY, watermark.size.to_string()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionInput, DecisionType};
    use chrono::Utc;
    use std::io::Write;

    fn decision(id: &str, problem: &str, files: &[&str]) -> Decision {
        let mut input = DecisionInput::new(DecisionType::Process, problem, "choice");
        input.files = files.iter().map(|f| f.to_string()).collect();
        Decision::new(id, input, Utc::now())
    }

    fn fts_hits(index: &SqliteIndex, query: &str) -> i64 {
        index
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM decisions_fts WHERE decisions_fts MATCH ?1",
                params![query],
                |row| row.get(0),
            )
            .expect("fts count")
    }

    fn association_count(index: &SqliteIndex, id: &str) -> i64 {
        index
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM decision_files WHERE decision_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .expect("association count")
    }

    #[test]
    fn missing_log_opens_empty_and_is_not_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = LogStore::new(dir.path().join("decisions.jsonl"));
        let index = SqliteIndex::open_in_memory(log).expect("open");
        assert!(!index.is_stale().expect("stale check"));
        assert_eq!(index.decision_count().expect("count"), 0);
        assert_eq!(index.stored_watermark().expect("watermark"), None);
    }

    #[test]
    fn open_sets_schema_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = SqliteIndex::open(&LedgerPaths::new(dir.path())).expect("open");
        let version: i64 = index
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
        assert!(dir.path().join(".keel/index.sqlite").is_file());
    }

    #[test]
    fn existing_log_is_indexed_on_first_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = LogStore::new(dir.path().join("decisions.jsonl"));
        log.append(&decision("DEC-0001", "alpha", &["src/a.rs"]))
            .expect("append");
        log.append(&decision("DEC-0002", "beta", &[])).expect("append");

        let index = SqliteIndex::open_in_memory(log.clone()).expect("open");
        assert_eq!(index.decision_count().expect("count"), 2);
        assert!(!index.is_stale().expect("fresh"));
        assert_eq!(
            index.stored_watermark().expect("stored"),
            log.watermark().expect("current")
        );
    }

    #[test]
    fn index_one_upserts_and_keeps_fts_in_sync() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = LogStore::new(dir.path().join("decisions.jsonl"));
        let index = SqliteIndex::open_in_memory(log.clone()).expect("open");

        let first = decision("DEC-0001", "alpha", &["src/a.rs"]);
        log.append(&first).expect("append");
        index.index_one(&first).expect("index first");
        assert_eq!(fts_hits(&index, "alpha"), 1);

        let replaced = decision("DEC-0001", "omega", &["src/b.rs"]);
        log.append(&replaced).expect("append");
        index.index_one(&replaced).expect("index replacement");

        assert_eq!(index.decision_count().expect("count"), 1);
        assert_eq!(fts_hits(&index, "alpha"), 0);
        assert_eq!(fts_hits(&index, "omega"), 1);
        assert_eq!(association_count(&index, "DEC-0001"), 2);
        assert!(!index.is_stale().expect("watermark advanced"));
    }

    #[test]
    fn external_log_change_marks_index_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = LogStore::new(dir.path().join("decisions.jsonl"));
        log.append(&decision("DEC-0001", "alpha", &[])).expect("append");
        let index = SqliteIndex::open_in_memory(log.clone()).expect("open");
        assert!(!index.is_stale().expect("fresh"));

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .expect("open log");
        file.write_all(
            format!("{}\n", decision("DEC-0002", "beta", &[]).to_json().expect("json"))
                .as_bytes(),
        )
        .expect("external append");
        drop(file);

        assert!(index.is_stale().expect("stale"));
        index.rebuild().expect("rebuild");
        assert_eq!(index.decision_count().expect("count"), 2);
        assert!(!index.is_stale().expect("fresh again"));
    }

    #[test]
    fn rebuild_replaces_rows_with_log_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = LogStore::new(dir.path().join("decisions.jsonl"));
        let index = SqliteIndex::open_in_memory(log.clone()).expect("open");

        // Indexed but never appended, so a rebuild must drop it.
        index
            .index_one(&decision("DEC-dead", "ghost", &["src/ghost.rs"]))
            .expect("index ghost");
        log.append(&decision("DEC-0001", "alpha", &["src/a.rs", "src/b.rs"]))
            .expect("append");

        let stats = index.rebuild().expect("rebuild");
        assert_eq!(
            stats,
            RebuildStats {
                snapshots_read: 1,
                decisions_indexed: 1
            }
        );
        assert_eq!(index.decision_count().expect("count"), 1);
        assert_eq!(association_count(&index, "DEC-dead"), 0);
        assert_eq!(association_count(&index, "DEC-0001"), 2);
        assert_eq!(fts_hits(&index, "ghost"), 0);
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = LedgerPaths::new(dir.path());
        fs::create_dir_all(&paths.keel_dir).expect("keel dir");
        {
            let conn = Connection::open(&paths.index).expect("raw open");
            conn.execute_batch("PRAGMA user_version = 99;").expect("bump");
        }
        assert!(matches!(
            SqliteIndex::open(&paths),
            Err(LedgerError::UnsupportedIndexVersion(99))
        ));
    }
}
