//! Durable record of rejected batches
//!
//! Each rejected record becomes one JSON line:
//!
//! ```json
//! {"resource":"customers","run_id":"…","batch":3,"logged_at":"2026-01-01T00:00:00Z","error":"…","record":{"id":"7","name":"Acme"}}
//! ```
//!
//! A batch's lines are appended with a single write and synced before
//! [`FailureLog::record`] returns. A failed write drops the file handle and the
//! next batch starts on a fresh line, so a torn tail costs at most one line and
//! readers should skip blank lines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::batch::Batch;
use crate::error::LogWriteError;
use crate::record::Record;

/// Persists the contents of batches the sink rolled back
#[async_trait]
pub trait FailureLog: Send {
    /// Durably store every record of `batch` with `reason`
    async fn record(&mut self, resource: &str, batch: &Batch, reason: &str) -> Result<(), LogWriteError>;
}

#[derive(Serialize)]
struct FailureEntry<'a> {
    resource: &'a str,
    run_id: Uuid,
    batch: u64,
    logged_at: DateTime<Utc>,
    error: &'a str,
    record: &'a Record,
}

/// Append-only JSON-lines file, opened on first use
pub struct JsonlFailureLog {
    path: PathBuf,
    run_id: Uuid,
    file: Option<File>,
    written: u64,
    /// The last write failed and may have left a partial line
    torn: bool,
}

impl JsonlFailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_run_id(path, Uuid::new_v4())
    }

    pub fn with_run_id(path: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Self {
            path: path.into(),
            run_id,
            file: None,
            written: 0,
            torn: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records written by this instance
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Whether a file handle is cached for the next write
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn io_error(&self, source: std::io::Error) -> LogWriteError {
        LogWriteError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    async fn open(&mut self) -> Result<&mut File, LogWriteError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| self.io_error(e))?;
            debug!(path = %self.path.display(), "Opened failure log");
            self.file = Some(file);
        }

        let path = self.path.display().to_string();
        self.file.as_mut().ok_or_else(|| LogWriteError::Io {
            path,
            source: std::io::Error::other("failure log not open"),
        })
    }
}

#[async_trait]
impl FailureLog for JsonlFailureLog {
    async fn record(&mut self, resource: &str, batch: &Batch, reason: &str) -> Result<(), LogWriteError> {
        let logged_at = Utc::now();
        let mut buf = Vec::with_capacity(batch.len() * 128 + 1);
        if self.torn {
            buf.push(b'\n');
        }
        for record in batch.records() {
            let entry = FailureEntry {
                resource,
                run_id: self.run_id,
                batch: batch.sequence(),
                logged_at,
                error: reason,
                record,
            };
            serde_json::to_writer(&mut buf, &entry)?;
            buf.push(b'\n');
        }

        let file = self.open().await?;
        let result = async {
            file.write_all(&buf).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = result {
            self.file = None;
            self.torn = true;
            return Err(self.io_error(e));
        }

        self.torn = false;
        self.written += batch.len() as u64;
        Ok(())
    }
}
