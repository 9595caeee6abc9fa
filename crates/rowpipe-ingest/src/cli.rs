//! Command-line interface definitions
//!
//! Kept in the library so `xtask` can render the reference docs from the same types.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rowpipe-ingest")]
#[command(author, version, about = "Stream delimited files into a database in transactional batches")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load every configured resource, one after another
    Run {
        /// Run configuration file (TOML)
        #[arg(short, long, env = "ROWPIPE_CONFIG")]
        config: PathBuf,

        /// Records per transaction, overrides the configuration
        #[arg(short, long)]
        batch_capacity: Option<usize>,

        /// Only load these resources (repeatable)
        #[arg(long = "only", value_name = "RESOURCE")]
        only: Vec<String>,

        /// Validate input against the schemas without writing to the database
        #[arg(long)]
        dry_run: bool,

        /// Also write the run summary as JSON to this file
        #[arg(long, value_name = "PATH")]
        summary_json: Option<PathBuf>,

        /// Disable progress spinners
        #[arg(long)]
        no_progress: bool,
    },

    /// Load and validate the configuration, then print the resolved plan
    CheckConfig {
        /// Run configuration file (TOML)
        #[arg(short, long, env = "ROWPIPE_CONFIG")]
        config: PathBuf,
    },
}
