//! CLI for the gatherer image collector.

mod args;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use gatherer_core::config;
use std::path::PathBuf;

use commands::{
    run_ack, run_completions, run_fingerprint, run_manpage, run_retry, run_show, run_source,
    run_sources, run_status, RunOptions,
};

/// Top-level CLI for the gatherer image collector.
#[derive(Debug, Parser)]
#[command(name = "gatherer")]
#[command(about = "gatherer: scripted image collection engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run a collection source and follow it until it finishes.
    Run {
        /// Source id (a directory under the sources directory).
        source: String,

        /// Script parameter; the value is parsed as JSON, else taken as text.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Extra request header sent with every page and image fetch.
        #[arg(long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// Directory for collected items (default: configured output_dir).
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Group items into a sub-directory with this name.
        #[arg(long, value_name = "ID")]
        group: Option<String>,

        /// Task worker threads (default: task_workers from config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Global ceiling on concurrent image downloads, 1 to 10.
        #[arg(long, value_name = "M")]
        downloads: Option<usize>,
    },

    /// Show status of all tasks.
    Status,

    /// Show one task, including any crash snapshot.
    Show {
        /// Task identifier.
        id: String,
    },

    /// Run a finished task again as a new task.
    Retry {
        /// Task identifier.
        id: String,
    },

    /// Acknowledge a task's crash snapshot.
    Ack {
        /// Task identifier.
        id: String,
    },

    /// List sources in the sources directory.
    Sources,

    /// Compute the dedup fingerprint (SHA-256) of a file.
    Fingerprint {
        /// Path to the file.
        path: PathBuf,
    },

    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: Shell,
    },

    /// Print the man page (roff).
    Manpage,
}

impl Cli {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // Commands that need no configuration.
        match &cli.command {
            CliCommand::Fingerprint { path } => return run_fingerprint(path),
            CliCommand::Completions { shell } => return run_completions(*shell),
            CliCommand::Manpage => return run_manpage(),
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run {
                source,
                params,
                headers,
                output_dir,
                group,
                workers,
                downloads,
            } => {
                let opts = RunOptions {
                    source,
                    params: args::parse_params(&params)?,
                    headers: args::parse_headers(&headers)?,
                    output_dir,
                    group,
                    workers,
                    downloads,
                };
                run_source(cfg, opts)?;
            }
            CliCommand::Status => run_status()?,
            CliCommand::Show { id } => run_show(&id)?,
            CliCommand::Retry { id } => run_retry(cfg, &id)?,
            CliCommand::Ack { id } => run_ack(cfg, &id)?,
            CliCommand::Sources => run_sources(&cfg)?,
            CliCommand::Fingerprint { .. } | CliCommand::Completions { .. } | CliCommand::Manpage => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
