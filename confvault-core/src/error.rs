use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::validate::ValidationIssue;

pub type Result<T> = std::result::Result<T, Error>;

/// Where in a mutating operation a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Locking,
    Reading,
    Committing,
    Validating,
    SafetySnapshotting,
    Restoring,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Locking => "locking",
            Stage::Reading => "reading",
            Stage::Committing => "committing",
            Stage::Validating => "validating",
            Stage::SafetySnapshotting => "safety_snapshotting",
            Stage::Restoring => "restoring",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    WriteConflict,
    Busy,
    Timeout,
    Cancelled,
    StorageFailure,
    InvalidInput,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Revision not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {}", format_issues(.0))]
    ValidationFailed(Vec<ValidationIssue>),

    #[error("Working tree changed while it was being recorded: {0}")]
    WriteConflict(String),

    #[error("Another mutation is in progress")]
    Busy,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History store corrupted: {0}")]
    Corrupted(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{stage} failed: {source}")]
    Staged {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Error::WriteConflict(_) => ErrorKind::WriteConflict,
            Error::Busy => ErrorKind::Busy,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::Corrupted(_) => {
                ErrorKind::StorageFailure
            }
            Error::Config(_) | Error::InvalidPath(_) => ErrorKind::InvalidInput,
            Error::Staged { source, .. } => source.kind(),
        }
    }

    /// The outermost stage: the phase of the operation the caller ran that
    /// failed. For a rollback this tells "nothing was touched yet" apart from
    /// "the safety snapshot exists but the restore did not finish".
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Staged { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost stage, i.e. the step inside that phase that failed.
    pub fn detail_stage(&self) -> Option<Stage> {
        match self {
            Error::Staged { stage, source } => source.detail_stage().or(Some(*stage)),
            _ => None,
        }
    }

    /// Strips stage wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Staged { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wraps the error in `stage`. Already-staged errors keep their inner
    /// stage as detail.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Error::Staged { stage: inner, .. } if inner == stage => self,
            other => Error::Staged {
                stage,
                source: Box::new(other),
            },
        }
    }
}

pub(crate) trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<Error>> StageExt<T> for std::result::Result<T, E> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.into().at(stage))
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_stage_wins_and_inner_is_detail() {
        let err = Error::WriteConflict("moved".into())
            .at(Stage::Reading)
            .at(Stage::SafetySnapshotting);
        assert_eq!(err.stage(), Some(Stage::SafetySnapshotting));
        assert_eq!(err.detail_stage(), Some(Stage::Reading));
        assert_eq!(err.kind(), ErrorKind::WriteConflict);
        assert!(matches!(err.root(), Error::WriteConflict(_)));
    }

    #[test]
    fn test_same_stage_is_not_wrapped_twice() {
        let err = Error::Busy.at(Stage::Committing).at(Stage::Committing);
        assert_eq!(err.to_string(), "committing failed: Another mutation is in progress");
        assert_eq!(err.detail_stage(), Some(Stage::Committing));
    }

    #[test]
    fn test_storage_errors_classify_as_storage_failure() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_display_names_stage() {
        let err = Error::NotFound("abc".into()).at(Stage::Validating);
        assert_eq!(err.to_string(), "validating failed: Revision not found: abc");
    }
}
