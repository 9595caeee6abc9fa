//! Terminal progress for running jobs
//!
//! One spinner per job, labelled with the resource actually being loaded. Hidden
//! bars are used when progress is disabled or stderr is not a terminal, so the job
//! runner never has to branch on it.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner tracking one job's committed and rejected rows
#[derive(Debug, Clone)]
pub struct JobProgress {
    bar: ProgressBar,
    resource: String,
    committed: u64,
    rejected: u64,
}

impl JobProgress {
    /// Visible spinner when `enabled`, hidden otherwise
    pub fn start(resource: &str, enabled: bool) -> Self {
        let bar = if enabled {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        };

        let progress = Self {
            bar,
            resource: resource.to_string(),
            committed: 0,
            rejected: 0,
        };
        progress.redraw();
        progress
    }

    pub fn hidden(resource: &str) -> Self {
        Self::start(resource, false)
    }

    pub fn batch_committed(&mut self, rows: u64) {
        self.committed += rows;
        self.redraw();
    }

    pub fn batch_rejected(&mut self, rows: u64) {
        self.rejected += rows;
        self.redraw();
    }

    /// Leave a final line with `outcome`
    pub fn finish(&self, outcome: &str) {
        self.bar.finish_with_message(format!(
            "{}: {} ({} committed, {} rejected)",
            self.resource, outcome, self.committed, self.rejected
        ));
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn redraw(&self) {
        self.bar.set_message(format!(
            "{}: {} committed, {} rejected",
            self.resource, self.committed, self.rejected
        ));
    }
}

/// Rows per second, `-` when nothing measurable elapsed
pub fn format_rate(rows: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if rows == 0 || secs <= f64::EPSILON {
        return "-".to_string();
    }
    format!("{:.0} rows/s", rows as f64 / secs)
}
