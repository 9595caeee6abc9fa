//! Sequential job orchestration
//!
//! Jobs run strictly one after another against the same sink, so only one
//! transaction is ever open. A failed job never stops the run; the only way to stop
//! early is the cancellation token, which is checked between jobs.

use chrono::{DateTime, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::failure_log::FailureLog;
use crate::job::{serialize_millis, JobResult, JobRunner};
use crate::progress::format_rate;
use crate::schema::Resource;
use crate::sink::TransactionalSink;
use crate::source::SourceFactory;

/// One resource to load and where its records come from
pub struct JobSpec {
    pub resource: Resource,
    pub source: Box<dyn SourceFactory>,
}

impl JobSpec {
    pub fn new(resource: Resource, source: impl SourceFactory + 'static) -> Self {
        Self {
            resource,
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("resource", &self.resource.name)
            .field("source", &self.source.locator())
            .finish()
    }
}

/// Derived run-wide counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub rows_committed: u64,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of a whole run, one entry per started job in configuration order
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub jobs: Vec<JobResult>,
    /// Resources not started because the run was cancelled
    pub skipped: Vec<String>,
    pub totals: RunTotals,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>, elapsed: Duration, jobs: Vec<JobResult>, skipped: Vec<String>) -> Self {
        let completed = jobs.iter().filter(|j| j.state.is_completed()).count();
        let totals = RunTotals {
            rows_committed: jobs.iter().map(|j| j.rows_committed).sum(),
            completed,
            failed: jobs.len() - completed,
            skipped: skipped.len(),
        };
        Self {
            run_id,
            started_at,
            elapsed,
            jobs,
            skipped,
            totals,
        }
    }

    /// Every configured resource ran and completed
    pub fn all_completed(&self) -> bool {
        self.skipped.is_empty() && self.totals.failed == 0
    }

    pub fn was_cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn job(&self, resource: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.resource == resource)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Resource", "State", "Rows", "Batches", "Elapsed", "Detail"]);

        for job in &self.jobs {
            table.add_row(vec![
                job.resource.clone(),
                job.state.label().to_string(),
                job.rows_committed.to_string(),
                job.batches_committed.to_string(),
                format!("{:.2}s", job.elapsed.as_secs_f64()),
                job.state.detail(),
            ]);
        }
        for resource in &self.skipped {
            table.add_row(vec![
                resource.clone(),
                "skipped".to_string(),
                "0".to_string(),
                "0".to_string(),
                "-".to_string(),
                "run cancelled".to_string(),
            ]);
        }

        writeln!(f, "{table}")?;
        write!(
            f,
            "Run {}: {} rows committed, {} completed, {} failed, {} skipped in {:.2}s ({})",
            self.run_id,
            self.totals.rows_committed,
            self.totals.completed,
            self.totals.failed,
            self.totals.skipped,
            self.elapsed.as_secs_f64(),
            format_rate(self.totals.rows_committed, self.elapsed)
        )
    }
}

/// Runs jobs in order against one sink and one failure log
pub struct Orchestrator<S, L> {
    sink: S,
    failures: L,
    capacity: NonZeroUsize,
    run_id: Uuid,
    show_progress: bool,
}

impl<S, L> Orchestrator<S, L>
where
    S: TransactionalSink,
    L: FailureLog,
{
    pub fn new(sink: S, failures: L, capacity: NonZeroUsize) -> Self {
        Self {
            sink,
            failures,
            capacity,
            run_id: Uuid::new_v4(),
            show_progress: false,
        }
    }

    /// Use a caller-chosen run id, e.g. the one stamped into failure log lines
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn failures(&self) -> &L {
        &self.failures
    }

    pub fn into_parts(self) -> (S, L) {
        (self.sink, self.failures)
    }

    /// Run every job in order and summarize; never fails
    pub async fn run(&mut self, jobs: Vec<JobSpec>, cancel: &CancellationToken) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let total = jobs.len();
        let mut results = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        info!(run_id = %self.run_id, jobs = total, capacity = self.capacity.get(), "Starting run");

        for (idx, job) in jobs.into_iter().enumerate() {
            if cancel.is_cancelled() {
                skipped.push(job.resource.name);
                continue;
            }

            info!(job = idx + 1, of = total, resource = %job.resource.name, "Running job");
            let result = JobRunner::new(&mut self.sink, &mut self.failures, self.capacity)
                .with_progress(self.show_progress)
                .run(&job.resource, job.source.as_ref())
                .await;
            results.push(result);
        }

        if !skipped.is_empty() {
            warn!(skipped = ?skipped, "Run cancelled, remaining jobs skipped");
        }

        let summary = RunSummary::new(self.run_id, started_at, started.elapsed(), results, skipped);
        info!(
            run_id = %summary.run_id,
            rows = summary.totals.rows_committed,
            completed = summary.totals.completed,
            failed = summary.totals.failed,
            skipped = summary.totals.skipped,
            "Run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;

    fn result(resource: &str, rows: u64, state: JobState) -> JobResult {
        JobResult {
            resource: resource.into(),
            rows_committed: rows,
            batches_committed: rows / 100,
            elapsed: Duration::from_millis(10),
            state,
        }
    }

    #[test]
    fn test_totals_and_flags() {
        let summary = RunSummary::new(
            Uuid::new_v4(),
            Utc::now(),
            Duration::from_secs(1),
            vec![
                result(
                    "customers",
                    100,
                    JobState::FailedPartway {
                        failed_batch: 2,
                        reason: "duplicate key".into(),
                        log_error: None,
                    },
                ),
                result("orders", 300, JobState::Completed),
            ],
            vec!["invoices".into()],
        );

        assert_eq!(summary.totals.rows_committed, 400);
        assert_eq!(summary.totals.completed, 1);
        assert_eq!(summary.totals.failed, 1);
        assert_eq!(summary.totals.skipped, 1);
        assert!(!summary.all_completed());
        assert!(summary.was_cancelled());
        assert_eq!(summary.job("orders").map(|j| j.rows_committed), Some(300));
    }

    #[test]
    fn test_display_lists_every_resource() {
        let summary = RunSummary::new(
            Uuid::new_v4(),
            Utc::now(),
            Duration::from_secs(2),
            vec![result("customers", 250, JobState::Completed)],
            vec!["orders".into()],
        );

        let rendered = summary.to_string();
        assert!(rendered.contains("customers"));
        assert!(rendered.contains("completed"));
        assert!(rendered.contains("orders"));
        assert!(rendered.contains("skipped"));
        assert!(rendered.contains("250 rows committed"));
    }

    #[test]
    fn test_json_summary() {
        let summary = RunSummary::new(
            Uuid::new_v4(),
            Utc::now(),
            Duration::from_millis(42),
            vec![result("customers", 0, JobState::SourceError {
                reason: "missing header row".into(),
                dropped_records: 0,
            })],
            Vec::new(),
        );

        let json: serde_json::Value = serde_json::from_str(&summary.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["elapsed_ms"], 42);
        assert_eq!(json["jobs"][0]["state"], "source_error");
        assert_eq!(json["totals"]["failed"], 1);
        assert!(json["skipped"].as_array().unwrap().is_empty());
    }
}
