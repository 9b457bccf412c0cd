//! CLI command definitions for the `conductor` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod plan;
pub mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect planner output and rehearse plan-execute runs offline.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file (defaults to ./conductor.toml).
    #[arg(long, global = true, env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse planner output and check its dependency graph.
    Validate {
        /// File holding raw planner output.
        file: PathBuf,
    },

    /// Show the execution waves of a plan.
    Waves {
        /// File holding raw planner output.
        file: PathBuf,
    },

    /// Run a plan through the scheduler with scripted offline agents.
    Simulate {
        /// File holding raw planner output.
        file: PathBuf,

        /// Goal handed to the scheduler.
        #[arg(long)]
        goal: String,

        /// Task ID the scripted executor should fail (repeatable).
        #[arg(long = "fail", value_name = "TASK_ID")]
        fail: Vec<String>,
    },
}
