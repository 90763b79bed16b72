//! The append-only decision log, `.keel/decisions.jsonl`.
//!
//! The log is the only durable source of truth. Lines are never rewritten;
//! retiring a decision is a new line for the same id.

pub mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::LedgerPaths;
use crate::decision::Decision;
use crate::error::{LedgerError, Result};

pub use snapshot::{LatestState, Snapshot};

/// Size and modification time of the log, used by the index to notice that
/// the log changed underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub mtime_nanos: u128,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_paths(paths: &LedgerPaths) -> Self {
        Self::new(&paths.log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Creates the log (and its directory) if absent. Existing content is
    /// left untouched.
    pub fn ensure_exists(&self) -> Result<()> {
        self.open_for_append().map(drop)
    }

    /// Appends one record as a single newline-terminated JSON line.
    ///
    /// The line goes out in one `write_all` on an append-mode handle; records
    /// are not atomic across a crash or across multiple calls.
    pub fn append(&self, decision: &Decision) -> Result<()> {
        let mut line = decision.to_json()?;
        line.push('\n');

        let mut file = self.open_for_append()?;
        file.write_all(line.as_bytes())
            .map_err(|err| LedgerError::io(&self.path, err))?;
        tracing::debug!(id = %decision.id, status = %decision.status, "appended decision line");
        Ok(())
    }

    fn open_for_append(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| LedgerError::io(parent, err))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| LedgerError::io(&self.path, err))
    }

    /// Every parseable line, in file order. A missing log reads as empty;
    /// a line that is not valid UTF-8 or JSON is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<Snapshot>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LedgerError::io(&self.path, err)),
        };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut out = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|err| LedgerError::io(&self.path, err))?;
            if read == 0 {
                break;
            }
            line_no += 1;

            let Ok(line) = std::str::from_utf8(&buf) else {
                tracing::warn!(line = line_no, path = %self.path.display(), "skipping log line that is not valid UTF-8");
                continue;
            };
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Snapshot>(line) {
                Ok(snapshot) => out.push(snapshot),
                Err(err) => {
                    tracing::warn!(
                        line = line_no,
                        path = %self.path.display(),
                        error = %err,
                        "skipping unparsable log line"
                    );
                }
            }
        }

        Ok(out)
    }

    pub fn latest_state(&self) -> Result<LatestState> {
        Ok(LatestState::from_snapshots(self.read_all()?))
    }

    /// `None` when the log does not exist yet.
    pub fn watermark(&self) -> Result<Option<Watermark>> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LedgerError::io(&self.path, err)),
        };
        let modified = metadata
            .modified()
            .map_err(|err| LedgerError::io(&self.path, err))?;
        let mtime_nanos = modified
            .duration_since(UNIX_EPOCH)
            .map_err(|err| LedgerError::io(&self.path, io::Error::other(err.to_string())))?
            .as_nanos();
        Ok(Some(Watermark {
            mtime_nanos,
            size: metadata.len(),
        }))
    }
}
