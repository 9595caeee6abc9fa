//! In-memory sinks, sources and failure logs for engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use rowpipe_ingest::error::{CommitCause, CommitError, LogWriteError, SourceError};
use rowpipe_ingest::failure_log::FailureLog;
use rowpipe_ingest::sink::TransactionalSink;
use rowpipe_ingest::source::{RecordSource, SourceFactory, StreamSource};
use rowpipe_ingest::{Batch, ColumnSpec, ColumnType, FieldValue, Record, Resource, ResourceSchema};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

pub fn resource(name: &str) -> Resource {
    Resource::new(
        name,
        ResourceSchema::new(
            name,
            vec![
                ColumnSpec::new("id", ColumnType::Integer),
                ColumnSpec::new("name", ColumnType::Text),
            ],
        ),
    )
}

pub fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::from_pairs(vec![
                ("id", FieldValue::Integer(i as i64)),
                ("name", FieldValue::from(format!("row-{i}"))),
            ])
        })
        .collect()
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .map(|r| match r.get("id") {
            Some(FieldValue::Integer(i)) => *i,
            other => panic!("unexpected id {other:?}"),
        })
        .collect()
}

/// Yields `records`, optionally failing once `fail_after` of them were delivered
pub struct VecSource {
    records: Vec<Record>,
    fail_after: Option<usize>,
    pub produced: Arc<AtomicUsize>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            fail_after: None,
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.produced.clone()
    }
}

#[async_trait]
impl SourceFactory for VecSource {
    fn locator(&self) -> String {
        "memory".to_string()
    }

    async fn open(&self) -> Result<Box<dyn RecordSource>, SourceError> {
        let mut items: Vec<Result<Record, SourceError>> = self.records.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(SourceError::Decode {
                locator: "memory".into(),
                line: Some(n as u64 + 2),
                message: "unterminated quoted field".into(),
            }));
        }

        let produced = self.produced.clone();
        let stream = futures::stream::iter(items).inspect(move |_| {
            produced.fetch_add(1, Ordering::SeqCst);
        });
        Ok(Box::new(StreamSource::new(stream)))
    }
}

/// A source that cannot be opened
pub struct MissingSource;

#[async_trait]
impl SourceFactory for MissingSource {
    fn locator(&self) -> String {
        "missing.csv".to_string()
    }

    async fn open(&self) -> Result<Box<dyn RecordSource>, SourceError> {
        Err(SourceError::Open {
            locator: self.locator(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

/// One commit attempt as seen by the sink
#[derive(Debug, Clone)]
pub struct Attempt {
    pub resource: String,
    pub sequence: u64,
    pub records: Vec<Record>,
    pub committed: bool,
    /// Records the source had produced when the commit started
    pub produced_at_commit: Option<usize>,
}

/// Records every attempt; rejects the configured (resource, batch) pairs
#[derive(Default)]
pub struct RecordingSink {
    pub attempts: Vec<Attempt>,
    fail_on: Vec<(String, u64)>,
    produced: Option<Arc<AtomicUsize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, resource: &str, sequence: u64) -> Self {
        self.fail_on.push((resource.to_string(), sequence));
        self
    }

    pub fn watching(mut self, produced: Arc<AtomicUsize>) -> Self {
        self.produced = Some(produced);
        self
    }

    pub fn committed(&self, resource: &str) -> Vec<Record> {
        self.attempts
            .iter()
            .filter(|a| a.committed && a.resource == resource)
            .flat_map(|a| a.records.clone())
            .collect()
    }

    pub fn attempt_sizes(&self, resource: &str) -> Vec<usize> {
        self.attempts
            .iter()
            .filter(|a| a.resource == resource)
            .map(|a| a.records.len())
            .collect()
    }
}

#[async_trait]
impl TransactionalSink for RecordingSink {
    async fn commit(&mut self, batch: Batch, resource: &Resource) -> Result<u64, CommitError> {
        let fails = self
            .fail_on
            .iter()
            .any(|(name, seq)| *name == resource.name && *seq == batch.sequence());

        self.attempts.push(Attempt {
            resource: resource.name.clone(),
            sequence: batch.sequence(),
            records: batch.records().to_vec(),
            committed: !fails,
            produced_at_commit: self.produced.as_ref().map(|p| p.load(Ordering::SeqCst)),
        });

        if fails {
            return Err(CommitError::new(
                &resource.name,
                batch,
                CommitCause::Rejected("duplicate key value violates unique constraint".into()),
            ));
        }
        Ok(batch.len() as u64)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[derive(Debug, Clone)]
pub struct LoggedBatch {
    pub resource: String,
    pub sequence: u64,
    pub records: Vec<Record>,
    pub reason: String,
}

/// Keeps logged batches in memory, or fails every write when `broken`
#[derive(Default)]
pub struct MemoryFailureLog {
    pub batches: Vec<LoggedBatch>,
    broken: bool,
}

impl MemoryFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        Self {
            batches: Vec::new(),
            broken: true,
        }
    }
}

#[async_trait]
impl FailureLog for MemoryFailureLog {
    async fn record(&mut self, resource: &str, batch: &Batch, reason: &str) -> Result<(), LogWriteError> {
        if self.broken {
            return Err(LogWriteError::Io {
                path: "memory".into(),
                source: std::io::Error::other("no space left on device"),
            });
        }
        self.batches.push(LoggedBatch {
            resource: resource.to_string(),
            sequence: batch.sequence(),
            records: batch.records().to_vec(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}
