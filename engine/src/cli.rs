//! CLI interface for Cadence
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cadence plan orchestrator
///
/// Turns a goal into a validated plan and executes it against the configured
/// generative provider and the built-in capabilities.
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan and execute a goal
    Run {
        /// The goal to achieve
        goal: String,

        /// Extra context passed to the planner
        #[arg(long, default_value = "")]
        context: String,

        /// Token ceiling (defaults to budget.max_tokens)
        #[arg(long, value_name = "N")]
        max_tokens: Option<u64>,

        /// Wall-clock ceiling in seconds (defaults to budget.max_time_secs)
        #[arg(long, value_name = "N")]
        max_time_secs: Option<u64>,

        /// Step ceiling (defaults to budget.max_steps)
        #[arg(long, value_name = "N")]
        max_steps: Option<u32>,
    },

    /// Check a plan file against the built-in capability catalog
    Validate {
        /// Plan JSON: an array of steps or an object with a "steps" array
        plan: PathBuf,
    },

    /// Continue a run from a saved snapshot
    Resume {
        /// Snapshot written by a previous run
        snapshot: PathBuf,
    },

    /// List available capabilities
    Catalog,
}
