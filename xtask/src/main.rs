//! Build automation tasks for rowpipe
//!
//! - `generate-cli-docs`: renders the `rowpipe-ingest` command reference from the
//!   clap definitions so the docs cannot drift from the binary.

use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for rowpipe", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<rowpipe_ingest::cli::Cli>();

    let content = format!(
        r#"# rowpipe-ingest CLI Reference

Generated from the CLI source code on {}.

## Overview

`rowpipe-ingest` streams delimited files into PostgreSQL. Each configured resource
is loaded in batches of `batch_capacity` records, one transaction per batch.
Resources run one after another; a failed batch stops only its own resource and
its rows are appended to the failure log.

## Commands

{}

## Exit Status

- `0` every resource completed
- `1` configuration or startup error
- `2` at least one resource failed, or the run was interrupted

## Environment Variables

- `ROWPIPE_CONFIG` - configuration file used when `--config` is omitted
- `ROWPIPE_BATCH_CAPACITY`, `ROWPIPE_FAILURE_LOG` - override the configuration file
- `ROWPIPE_SINK_CONNECTION__URL` - database URL (falls back to `DATABASE_URL`)
- `ROWPIPE_LOG_LEVEL`, `ROWPIPE_LOG_FORMAT`, `ROWPIPE_LOG_OUTPUT` - logging

## Configuration

```toml
batch_capacity = 100
failure_log = "./rowpipe-failures.jsonl"

[sink_connection]
url = "postgres://loader@localhost/warehouse"

[[resources]]
name = "customers"
table = "public.customers"
source = "data/customers.csv"
columns = [
    {{ name = "id", type = "integer" }},
    {{ name = "name", type = "text" }},
    {{ name = "signed_up", type = "date", nullable = true }},
]
```

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let file_path = output_path.join("cli.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
