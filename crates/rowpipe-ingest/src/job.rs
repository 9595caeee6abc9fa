//! Stream job runner
//!
//! One job drains one source into one resource: records go into the batcher, each
//! full batch is committed before the source is polled again, and the first commit
//! failure or source error ends the job. The running row total only grows after the
//! sink confirms a commit.

use serde::{Serialize, Serializer};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::batch::{Batch, Batcher};
use crate::failure_log::FailureLog;
use crate::progress::{format_rate, JobProgress};
use crate::schema::Resource;
use crate::sink::TransactionalSink;
use crate::source::{RecordSource, SourceFactory};

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Every record was committed
    Completed,

    /// A batch was rolled back; batches before it stay committed
    FailedPartway {
        failed_batch: u64,
        reason: String,
        /// Set when the rejected batch could not be written to the failure log
        log_error: Option<String>,
    },

    /// The source could not be opened or produced malformed input
    SourceError {
        reason: String,
        /// Buffered records discarded without a commit attempt
        dropped_records: usize,
    },
}

impl JobState {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobState::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Completed => "completed",
            JobState::FailedPartway { .. } => "failed partway",
            JobState::SourceError { .. } => "source error",
        }
    }

    /// Failure detail, empty for completed jobs
    pub fn detail(&self) -> String {
        match self {
            JobState::Completed => String::new(),
            JobState::FailedPartway {
                failed_batch,
                reason,
                log_error: None,
            } => format!("batch {failed_batch}: {reason}"),
            JobState::FailedPartway {
                failed_batch,
                reason,
                log_error: Some(log_error),
            } => format!("batch {failed_batch}: {reason} (not logged: {log_error})"),
            JobState::SourceError { reason, .. } => reason.clone(),
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub resource: String,
    pub rows_committed: u64,
    pub batches_committed: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(flatten)]
    pub state: JobState,
}

pub(crate) fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Running totals owned by one job
#[derive(Debug, Default)]
struct Tally {
    rows: u64,
    batches: u64,
}

/// Drives a single job against a borrowed sink and failure log
pub struct JobRunner<'a, S: ?Sized, L: ?Sized> {
    sink: &'a mut S,
    failures: &'a mut L,
    capacity: NonZeroUsize,
    show_progress: bool,
}

impl<'a, S, L> JobRunner<'a, S, L>
where
    S: TransactionalSink + ?Sized,
    L: FailureLog + ?Sized,
{
    pub fn new(sink: &'a mut S, failures: &'a mut L, capacity: NonZeroUsize) -> Self {
        Self {
            sink,
            failures,
            capacity,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Run the job to a terminal state; never fails
    pub async fn run(mut self, resource: &Resource, factory: &dyn SourceFactory) -> JobResult {
        let span = info_span!("job", resource = %resource.name);
        async move {
            let started = Instant::now();
            let mut tally = Tally::default();
            let mut progress = JobProgress::start(&resource.name, self.show_progress);

            info!(
                source = %factory.locator(),
                table = %resource.schema.table,
                sink = self.sink.name(),
                capacity = self.capacity.get(),
                "Starting job"
            );

            let state = match factory.open().await {
                Ok(mut source) => {
                    self.drain(source.as_mut(), resource, &mut tally, &mut progress)
                        .await
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open source");
                    JobState::SourceError {
                        reason: e.to_string(),
                        dropped_records: 0,
                    }
                }
            };

            let elapsed = started.elapsed();
            progress.finish(state.label());

            match &state {
                JobState::Completed => info!(
                    rows = tally.rows,
                    batches = tally.batches,
                    elapsed_ms = elapsed.as_millis() as u64,
                    rate = %format_rate(tally.rows, elapsed),
                    "Job completed"
                ),
                other => warn!(
                    rows = tally.rows,
                    batches = tally.batches,
                    state = other.label(),
                    detail = %other.detail(),
                    "Job ended early"
                ),
            }

            JobResult {
                resource: resource.name.clone(),
                rows_committed: tally.rows,
                batches_committed: tally.batches,
                elapsed,
                state,
            }
        }
        .instrument(span)
        .await
    }

    async fn drain(
        &mut self,
        source: &mut dyn RecordSource,
        resource: &Resource,
        tally: &mut Tally,
        progress: &mut JobProgress,
    ) -> JobState {
        let mut batcher = Batcher::new(self.capacity);

        loop {
            match source.next_record().await {
                Ok(Some(record)) => {
                    if let Some(batch) = batcher.push(record) {
                        if let Err(state) = self.commit(batch, resource, tally, progress).await {
                            return state;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let dropped_records = batcher.discard();
                    warn!(error = %e, dropped_records, "Source error, discarding partial batch");
                    return JobState::SourceError {
                        reason: e.to_string(),
                        dropped_records,
                    };
                }
            }
        }

        if let Some(batch) = batcher.finish() {
            if let Err(state) = self.commit(batch, resource, tally, progress).await {
                return state;
            }
        }

        JobState::Completed
    }

    /// Commit one batch; on failure log it and return the terminal state
    async fn commit(
        &mut self,
        batch: Batch,
        resource: &Resource,
        tally: &mut Tally,
        progress: &mut JobProgress,
    ) -> Result<(), JobState> {
        let sequence = batch.sequence();

        match self.sink.commit(batch, resource).await {
            Ok(applied) => {
                tally.rows += applied;
                tally.batches += 1;
                progress.batch_committed(applied);
                debug!(batch = sequence, rows = applied, total = tally.rows, "Batch committed");
                Ok(())
            }
            Err(err) => {
                let reason = err.cause.to_string();
                warn!(batch = sequence, rows = err.batch.len(), error = %reason, "Batch rolled back");

                let log_error = match self.failures.record(&resource.name, &err.batch, &reason).await {
                    Ok(()) => None,
                    Err(log_err) => {
                        warn!(batch = sequence, error = %log_err, "Failed to write rejected batch to failure log");
                        Some(log_err.to_string())
                    }
                };
                progress.batch_rejected(err.batch.len() as u64);

                Err(JobState::FailedPartway {
                    failed_batch: sequence,
                    reason,
                    log_error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_result_json_shape() {
        let result = JobResult {
            resource: "customers".into(),
            rows_committed: 100,
            batches_committed: 1,
            elapsed: Duration::from_millis(1500),
            state: JobState::FailedPartway {
                failed_batch: 2,
                reason: "duplicate key".into(),
                log_error: None,
            },
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["resource"], "customers");
        assert_eq!(json["rows_committed"], 100);
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["state"], "failed_partway");
        assert_eq!(json["failed_batch"], 2);
        assert!(json["log_error"].is_null());
    }

    #[test]
    fn test_detail_mentions_log_error() {
        let state = JobState::FailedPartway {
            failed_batch: 3,
            reason: "boom".into(),
            log_error: Some("disk full".into()),
        };
        assert_eq!(state.detail(), "batch 3: boom (not logged: disk full)");
        assert_eq!(JobState::Completed.detail(), "");
        assert!(JobState::Completed.is_completed());
    }
}
