use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::ChangeKind;
use crate::settings::{default_config_dir, SettingsError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    Failed,
    /// The change never reached the database because no SQL could be built for it.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp_unix_ms: u128,
    pub result_set: usize,
    pub row: usize,
    pub kind: ChangeKind,
    pub outcome: AuditOutcome,
    pub sql: Option<String>,
    pub rows_affected: Option<u64>,
    pub elapsed_ms: Option<u128>,
    pub error: Option<String>,
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum AuditTrailError {
    #[error("cannot locate the journal: {0}")]
    Location(#[from] SettingsError),
    #[error("journal path `{0}` has no parent directory")]
    NoParent(PathBuf),
    #[error("journal i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("journal entry could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("journal line {line} is not a valid entry: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

const JOURNAL_FILE: &str = "applied.ndjson";

/// Append-only NDJSON journal of applied changes, one entry per statement.
#[derive(Debug, Clone)]
pub struct FileAuditTrail {
    path: PathBuf,
}

impl FileAuditTrail {
    pub fn load_default() -> Result<Self, AuditTrailError> {
        Ok(Self::from_path(default_config_dir()?.join(JOURNAL_FILE)))
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AuditTrailError {
        AuditTrailError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), AuditTrailError> {
        let directory = self
            .path
            .parent()
            .ok_or_else(|| AuditTrailError::NoParent(self.path.clone()))?;
        fs::create_dir_all(directory).map_err(|source| self.io_error(source))?;

        let mut line = serde_json::to_string(record).map_err(AuditTrailError::Encode)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|source| self.io_error(source))
    }

    /// Every entry written so far, oldest first. A missing journal reads as empty.
    pub fn entries(&self) -> Result<Vec<AuditRecord>, AuditTrailError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|source| AuditTrailError::Decode {
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }
}
