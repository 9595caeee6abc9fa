//! Error kinds that terminate a single job
//!
//! None of these escape the job boundary: the runner folds each of them into a
//! [`JobState`](crate::job::JobState).

use thiserror::Error;

use crate::batch::Batch;
use crate::schema::SchemaViolation;

/// The record source could not be opened or produced malformed input
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open source '{locator}': {source}")]
    Open {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid header in '{locator}': {message}")]
    Header { locator: String, message: String },

    #[error("Malformed input in '{locator}' at line {}: {message}", line_label(.line))]
    Decode {
        locator: String,
        line: Option<u64>,
        message: String,
    },
}

impl SourceError {
    pub(crate) fn decode(locator: &str, err: csv_async::Error) -> Self {
        SourceError::Decode {
            locator: locator.to_string(),
            line: err.position().map(|p| p.line()),
            message: err.to_string(),
        }
    }
}

fn line_label(line: &Option<u64>) -> String {
    line.map_or_else(|| "?".to_string(), |l| l.to_string())
}

/// Why the sink rejected a batch
#[derive(Error, Debug)]
pub enum CommitCause {
    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// A batch that was rolled back, returned verbatim with the cause
#[derive(Error, Debug)]
#[error("Batch {} of '{resource}' ({} rows) was rolled back: {cause}", .batch.sequence(), .batch.len())]
pub struct CommitError {
    pub resource: String,
    pub batch: Batch,
    #[source]
    pub cause: CommitCause,
}

impl CommitError {
    pub fn new(resource: impl Into<String>, batch: Batch, cause: impl Into<CommitCause>) -> Self {
        Self {
            resource: resource.into(),
            batch,
            cause: cause.into(),
        }
    }
}

/// The failure log could not persist a rejected batch
#[derive(Error, Debug)]
pub enum LogWriteError {
    #[error("failure log I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize row for failure log: {0}")]
    Serialize(#[from] serde_json::Error),
}
