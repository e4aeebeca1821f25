//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running both schedulers until interrupted (`run`, the default)
//! - A single fetch/predict and verify pass (`cycle`)
//! - Importing a draw file through the same pipeline (`import`)
//! - Accuracy and session totals (`stats`)
//! - Listing stored forecasts (`forecasts`)
//! - Shell completion generation (`completion`)

mod completion;
mod report;
mod service;

pub use completion::{generate_completions, parse_shell, write_completions};
pub use report::{run_forecasts_command, run_stats_command};
pub use service::{build_context, run_cycle_command, run_import_command, run_service};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "drawcast")]
#[command(about = "Draw-history ingestion, tiered model training and forecast reconciliation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Snapshot file (overrides DRAWCAST_DATA_PATH)
    #[arg(short, long, global = true)]
    pub data: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the fetch and verify schedulers (default if no subcommand given)
    Run,

    /// Run one fetch/predict pass followed by one verify pass
    Cycle,

    /// Ingest a JSON draw file, then train, predict and verify
    Import {
        /// Draw file: a list of {issueId, winningValue} or the upstream envelope
        file: PathBuf,
    },

    /// Show accuracy and session totals
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored forecasts, newest first
    Forecasts {
        /// Only unresolved forecasts
        #[arg(long)]
        pending: bool,

        /// Maximum rows
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

impl Cli {
    pub fn should_run_service(&self) -> bool {
        matches!(self.command, None | Some(Command::Run))
    }
}
