//! Rowpipe Ingest Library
//!
//! Streams delimited files into a relational store in bounded, transactional batches.
//!
//! # Pipeline
//!
//! - **Record source** ([`source`]): pulls one decoded [`Record`] at a time
//! - **Batcher** ([`batch`]): groups records into fixed-capacity [`Batch`]es
//! - **Transactional sink** ([`sink`]): applies a whole batch or none of it
//! - **Failure log** ([`failure_log`]): keeps the exact rows of rejected batches
//! - **Job runner** ([`job`]): drives one resource end-to-end into a [`JobResult`]
//! - **Orchestrator** ([`orchestrator`]): runs every resource in order into a [`RunSummary`]
//!
//! # Example
//!
//! ```no_run
//! use rowpipe_ingest::{
//!     config::RunConfig, failure_log::JsonlFailureLog, orchestrator::Orchestrator,
//!     sink::PgSink,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::load(Some("rowpipe.toml".as_ref()))?;
//!     config.validate(true)?;
//!
//!     let sink = PgSink::connect(&config.sink_connection).await?;
//!     let failures = JsonlFailureLog::new(&config.failure_log);
//!     let mut orchestrator = Orchestrator::new(sink, failures, config.capacity()?);
//!
//!     let summary = orchestrator.run(config.jobs(&[])?, &CancellationToken::new()).await;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod failure_log;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod schema;
pub mod sink;
pub mod source;

pub use batch::{Batch, Batcher};
pub use error::{CommitCause, CommitError, LogWriteError, SourceError};
pub use job::{JobResult, JobRunner, JobState};
pub use orchestrator::{JobSpec, Orchestrator, RunSummary};
pub use record::{FieldValue, Record};
pub use schema::{ColumnSpec, ColumnType, Resource, ResourceSchema};
