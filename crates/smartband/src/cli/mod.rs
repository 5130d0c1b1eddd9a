//! Command-line interface for smartband.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{
    ConfigCommand, HistoryCommand, ReplayCommand, RunCommand, StatusCommand,
};

/// smartband - wearable health and fall monitor
///
/// Polls vital-sign, motion and position sensors, detects falls, serves a
/// live dashboard and notifies a caregiver when a fall is confirmed.
#[derive(Debug, Parser)]
#[command(name = "smartband")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the monitor, dashboard and alert dispatcher
    Run(RunCommand),

    /// Classify a recorded trace offline
    Replay(ReplayCommand),

    /// List journaled fall episodes
    History(HistoryCommand),

    /// Show configuration and journal summary
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}
