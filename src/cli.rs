//! CLI struct definitions for the warden command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "warden",
    version = env!("CARGO_PKG_VERSION"),
    about = "Safety layer for a self-hosted agent gateway: constitution validation, watcher supervision and config integrity guarding."
)]
pub(crate) struct Cli {
    /// Only log warnings and errors.
    #[clap(long, short = 'q', global = true)]
    pub quiet: bool,
    /// Emit logs as JSON lines on stderr.
    #[clap(long, global = true)]
    pub log_json: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the config integrity guardian (one pass, or a loop with --watch)
    Guard(GuardCli),

    /// Validate system prompts against the constitution
    Prompt(PromptCli),

    /// Supervise configured watcher processes
    Watchers(WatchersCli),

    /// Inspect or clear the gateway pause lock
    Pause(PauseCli),

    /// List recorded incidents, newest first
    Incidents(IncidentsCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct GuardCli {
    /// Agent configuration file (JSON).
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Guardian state directory (baseline, incidents, phrases, lock).
    #[clap(long)]
    pub state_dir: Option<PathBuf>,
    /// Agent workspace holding identity documents (overrides the config).
    #[clap(long)]
    pub workspace: Option<PathBuf>,
    /// Record the current configuration as the trusted baseline and exit.
    #[clap(long)]
    pub init_baseline: bool,
    /// Keep running, repeating the check pass every interval.
    #[clap(long)]
    pub watch: bool,
    /// Seconds between passes in --watch mode.
    #[clap(long)]
    pub check_interval: Option<u64>,
    /// Program run with the incident file path as its only argument.
    #[clap(long)]
    pub alert_cmd: Option<PathBuf>,
    /// Stop the gateway when a critical incident is recorded.
    #[clap(long)]
    pub pause_gateway: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PromptCli {
    #[clap(subcommand)]
    pub command: PromptCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PromptCommand {
    /// Check a prompt file; exits 1 when the constitution blocks it
    Check {
        /// Prompt text file.
        #[clap(long)]
        file: PathBuf,
        /// Agent configuration supplying the `constitution` section.
        #[clap(long)]
        config: Option<PathBuf>,
        /// Append the audit record to this file.
        #[clap(long)]
        audit_log: Option<PathBuf>,
        /// Context label for the audit record.
        #[clap(long, default_value = "cli")]
        context: String,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct WatchersCli {
    #[clap(subcommand)]
    pub command: WatchersCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum WatchersCommand {
    /// Run every enabled watcher until SIGTERM/SIGINT
    Run {
        /// Agent configuration file (JSON).
        #[clap(long)]
        config: Option<PathBuf>,
        /// Base directory for relative watcher working directories.
        #[clap(long)]
        working_dir: Option<PathBuf>,
    },
    /// Print the configured watchers and whether each would start
    List {
        /// Agent configuration file (JSON).
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct PauseCli {
    /// Guardian state directory.
    #[clap(long, global = true)]
    pub state_dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: PauseCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PauseCommand {
    /// Exit 1 if the gateway pause lock is set
    Status,
    /// Remove the pause lock
    Clear,
}

#[derive(clap::Args, Debug)]
pub(crate) struct IncidentsCli {
    /// Guardian state directory.
    #[clap(long)]
    pub state_dir: Option<PathBuf>,
    /// Show at most this many incidents.
    #[clap(long, default_value_t = 20)]
    pub limit: usize,
}
