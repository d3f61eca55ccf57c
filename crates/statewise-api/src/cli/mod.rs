//! CLI command definitions for the `statewise` binary.
//!
//! Uses clap derive macros for argument parsing. Workflow commands take a
//! definition file; execution commands work on the checkpoint store in the
//! data directory.

pub mod execution;
pub mod input;
pub mod render;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run Amazon States Language workflows.
#[derive(Parser)]
#[command(name = "statewise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow until it finishes or times out.
    ///
    /// With `--context`, progress is kept in that file (created if missing);
    /// otherwise the execution is checkpointed in the data directory.
    Run {
        /// Workflow definition (JSON or YAML).
        workflow: PathBuf,

        /// Execution input: JSON text or @file.
        #[arg(long)]
        input: Option<String>,

        /// Context file to resume from and save to.
        #[arg(long)]
        context: Option<PathBuf>,

        /// Credentials: JSON object text or @file.
        #[arg(long, env = "STATEWISE_CREDENTIALS", hide_env_values = true)]
        credentials: Option<String>,

        /// Give up after this many seconds (progress is kept).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Advance a context file by one non-blocking step.
    Step {
        /// Workflow definition (JSON or YAML).
        workflow: PathBuf,

        /// Context file (created if missing).
        #[arg(long)]
        context: PathBuf,

        /// Execution input for a new context: JSON text or @file.
        #[arg(long)]
        input: Option<String>,

        /// Credentials: JSON object text or @file.
        #[arg(long, env = "STATEWISE_CREDENTIALS", hide_env_values = true)]
        credentials: Option<String>,
    },

    /// Show the status and state history of a context file.
    Status {
        /// Context file.
        #[arg(long)]
        context: PathBuf,
    },

    /// Check a workflow definition for errors.
    Validate {
        /// Workflow definition (JSON or YAML).
        workflow: PathBuf,
    },

    /// Print a workflow's state graph as Graphviz DOT.
    Graph {
        /// Workflow definition (JSON or YAML).
        workflow: PathBuf,
    },

    /// Inspect and resume checkpointed executions.
    #[command(alias = "exec")]
    Executions {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
