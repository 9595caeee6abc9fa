//! Rowpipe Ingest - batch loader CLI
//!
//! Exit status: 0 when every job completed, 2 when any job failed or the run was
//! interrupted, 1 on configuration or startup errors.

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use rowpipe_common::logging::{init_logging, LogConfig, LogLevel};
use rowpipe_ingest::cli::{Cli, Commands};
use rowpipe_ingest::config::RunConfig;
use rowpipe_ingest::failure_log::JsonlFailureLog;
use rowpipe_ingest::orchestrator::Orchestrator;
use rowpipe_ingest::sink::{DryRunSink, PgSink, SinkBackend};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const EXIT_JOB_FAILED: u8 = 2;
const EXIT_ERROR: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (log_config, env_error) = log_config(cli.verbose);
    if let Some(e) = env_error {
        eprintln!("Warning: ignoring ROWPIPE_LOG_* overrides: {e}");
    }

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    let result = match cli.command {
        Commands::Run {
            config,
            batch_capacity,
            only,
            dry_run,
            summary_json,
            no_progress,
        } => {
            let options = RunOptions {
                batch_capacity,
                only,
                dry_run,
                summary_json,
                show_progress: !no_progress && std::io::stderr().is_terminal(),
            };
            run(&config, options).await
        },
        Commands::CheckConfig { config } => check_config(&config).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        },
    }
}

/// CLI log settings with `ROWPIPE_LOG_*` applied on top
///
/// An invalid override leaves the CLI settings untouched and is handed back so
/// it can be reported before logging exists.
fn log_config(verbose: bool) -> (LogConfig, Option<anyhow::Error>) {
    let level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    let config = LogConfig::builder()
        .level(level)
        .log_file_prefix("rowpipe-ingest")
        .build();

    match config.clone().merge_env() {
        Ok(merged) => (merged, None),
        Err(e) => (config, Some(e)),
    }
}

struct RunOptions {
    batch_capacity: Option<usize>,
    only: Vec<String>,
    dry_run: bool,
    summary_json: Option<PathBuf>,
    show_progress: bool,
}

async fn run(config_path: &Path, options: RunOptions) -> Result<ExitCode> {
    let mut config = RunConfig::load(Some(config_path))
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(capacity) = options.batch_capacity {
        config.batch_capacity = capacity;
    }
    config.validate(!options.dry_run)?;

    let capacity = config.capacity()?;
    let jobs = config.jobs(&options.only)?;
    let run_id = Uuid::new_v4();

    let sink: SinkBackend = if options.dry_run {
        info!("Dry run: batches are validated, nothing is written");
        DryRunSink::new().into()
    } else {
        PgSink::connect(&config.sink_connection)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to {}",
                    config.sink_connection.redacted_url()
                )
            })?
            .into()
    };
    let failures = JsonlFailureLog::with_run_id(&config.failure_log, run_id);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current job");
            interrupt.cancel();
        }
    });

    let mut orchestrator = Orchestrator::new(sink, failures, capacity)
        .with_run_id(run_id)
        .with_progress(options.show_progress);
    let summary = orchestrator.run(jobs, &cancel).await;

    println!("{summary}");

    let (_, failures) = orchestrator.into_parts();
    if failures.written() > 0 {
        warn!(
            rows = failures.written(),
            path = %failures.path().display(),
            "Rejected rows were written to the failure log"
        );
    }

    if let Some(path) = options.summary_json {
        let json = summary.to_json_pretty()?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run summary");
    }

    Ok(if summary.all_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_JOB_FAILED)
    })
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = RunConfig::load(Some(config_path))
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    config.validate(false)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Resource", "Table", "Source", "Columns"]);

    for resource in &config.resources {
        let columns = resource
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "?" } else { "" };
                format!("{}: {}{}", c.name, c.kind, null)
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            resource.name.clone(),
            resource.table().to_string(),
            resource.source.display().to_string(),
            columns,
        ]);
    }

    println!("{table}");
    println!("Batch capacity: {}", config.batch_capacity);
    println!("Failure log:    {}", config.failure_log.display());
    if config.sink_connection.url.is_empty() {
        println!("Sink:           not configured (dry runs only)");
    } else {
        println!(
            "Sink:           {} (max {} connections)",
            config.sink_connection.redacted_url(),
            config.sink_connection.max_connections
        );
    }
    Ok(())
}
