//! Append-only audit trail of mutating calls, kept apart from the history
//! store so it survives store corruption.

use crate::error::{Error, ErrorKind, Result, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    Commit,
    Rollback,
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure {
        kind: ErrorKind,
        stage: Option<Stage>,
        error: String,
    },
}

impl Outcome {
    pub fn from_error(error: &Error) -> Self {
        Outcome::Failure {
            kind: error.kind(),
            stage: error.stage(),
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub outcome: Outcome,
    pub revision: Option<String>,
    pub author: String,
    pub description: String,
}

impl OperationRecord {
    pub fn new(operation: Operation, author: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            outcome: Outcome::Success,
            revision: None,
            author: author.into(),
            description: description.into(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// JSON-lines log file. Entries are never rewritten or removed.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &OperationRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// All records in append order. Unreadable lines are skipped.
    pub fn read_all(&self) -> Result<Vec<OperationRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping journal line {} in {:?}: {}", number + 1, self.path, e),
            }
        }
        Ok(records)
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("meta/journal.jsonl")).unwrap();

        let ok = OperationRecord::new(Operation::Commit, "agent", "update automation: porch")
            .with_revision("abc123");
        let failed = OperationRecord::new(Operation::Rollback, "agent", "rollback to abc123")
            .with_outcome(Outcome::from_error(&Error::Busy.at(Stage::Locking)));

        journal.append(&ok).unwrap();
        journal.append(&failed).unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records, vec![ok.clone(), failed.clone()]);

        let recent = journal.recent(1).unwrap();
        assert_eq!(recent, vec![failed]);
        match &recent[0].outcome {
            Outcome::Failure { kind, stage, .. } => {
                assert_eq!(*kind, ErrorKind::Busy);
                assert_eq!(*stage, Some(Stage::Locking));
            }
            Outcome::Success => panic!("expected failure"),
        }
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");

        Journal::open(&path)
            .unwrap()
            .append(&OperationRecord::new(Operation::Initialize, "system", "first"))
            .unwrap();
        Journal::open(&path)
            .unwrap()
            .append(&OperationRecord::new(Operation::Commit, "system", "second"))
            .unwrap();

        let records = Journal::open(&path).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].description, "second");
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::open(&path).unwrap();
        journal
            .append(&OperationRecord::new(Operation::Commit, "a", "kept"))
            .unwrap();
        {
            let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
            raw.write_all(b"{not json\n").unwrap();
        }
        journal
            .append(&OperationRecord::new(Operation::Commit, "a", "also kept"))
            .unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
    }
}
