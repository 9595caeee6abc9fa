//! Transactional sinks
//!
//! A sink owns the destination connection and writes one batch per transaction.
//! `commit` takes `&mut self`, so a sink can only ever be driven by one job at a
//! time; a failed batch comes back inside the [`CommitError`] untouched.

mod dry_run;
mod postgres;

pub use dry_run::DryRunSink;
pub use postgres::{quote_ident, PgSink, MAX_BIND_PARAMETERS};

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::CommitError;
use crate::schema::Resource;

/// All-or-nothing batch writer
#[async_trait]
pub trait TransactionalSink: Send {
    /// Write every record of `batch` to `resource` in one transaction
    ///
    /// Returns the number of rows written. On error nothing from the batch is
    /// visible in the destination.
    async fn commit(&mut self, batch: Batch, resource: &Resource) -> Result<u64, CommitError>;

    /// Short backend name for logs and summaries
    fn name(&self) -> &'static str;
}

/// Sink selected at startup from configuration
pub enum SinkBackend {
    Postgres(PgSink),
    DryRun(DryRunSink),
}

#[async_trait]
impl TransactionalSink for SinkBackend {
    async fn commit(&mut self, batch: Batch, resource: &Resource) -> Result<u64, CommitError> {
        match self {
            SinkBackend::Postgres(sink) => sink.commit(batch, resource).await,
            SinkBackend::DryRun(sink) => sink.commit(batch, resource).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SinkBackend::Postgres(sink) => sink.name(),
            SinkBackend::DryRun(sink) => sink.name(),
        }
    }
}

impl From<PgSink> for SinkBackend {
    fn from(sink: PgSink) -> Self {
        SinkBackend::Postgres(sink)
    }
}

impl From<DryRunSink> for SinkBackend {
    fn from(sink: DryRunSink) -> Self {
        SinkBackend::DryRun(sink)
    }
}
