//! Persistent record of already-notified ticket identifiers.
//!
//! The ledger is what keeps one ticket from being emailed twice across
//! process restarts. On disk it is a single JSON array of strings
//! (`chamados_enviados.json`), pretty-printed and UTF-8 so operators can
//! read and hand-edit it. In memory it only grows; nothing ever removes
//! an identifier automatically.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot read ledger {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("ledger {path} is malformed: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("cannot persist ledger {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot encode ledger: {0}")]
    Encode(serde_json::Error),
}

/// Set of notified identifiers with its backing file.
#[derive(Debug)]
pub struct SentLedger {
    path: PathBuf,
    /// Insertion order, mirrored to the file.
    ids: Vec<String>,
    index: HashSet<String>,
}

impl SentLedger {
    /// Load the ledger from disk. A missing file means "nothing sent
    /// yet" and yields an empty ledger; a malformed file is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(&path).map_err(|source| LedgerError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: Vec<String> = serde_json::from_str(&content).map_err(|source| {
            LedgerError::Parse {
                path: path.display().to_string(),
                source,
            }
        })?;

        // Older files written by the append-happy variant may carry
        // duplicates; collapse them, first occurrence wins.
        let mut ledger = Self::empty(path);
        ledger.record(raw);
        Ok(ledger)
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            ids: Vec::new(),
            index: HashSet::new(),
        }
    }

    /// Whether `id` has already been notified.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Append identifiers not yet present. Duplicates are ignored; the
    /// set only grows.
    pub fn record<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            if self.index.insert(id.clone()) {
                self.ids.push(id);
            }
        }
    }

    /// Atomically rewrite the backing file with the full current set.
    ///
    /// Writes a sibling temp file and renames it over the target, so a
    /// crash mid-write never leaves a truncated ledger behind. On error
    /// the in-memory set is untouched; a later persist can still capture
    /// it.
    pub fn persist(&self) -> Result<(), LedgerError> {
        let write_err = |source| LedgerError::Write {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let content = serde_json::to_string_pretty(&self.ids).map_err(LedgerError::Encode)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
