//! CLI parse: clap types for actionflow. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// actionflow CLI - serialized command execution with undo/redo
#[derive(Parser)]
#[command(name = "actionflow")]
#[command(about = "Run command scripts against an in-memory resource registry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (for config/config.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script of commands, one per line ('#' starts a comment)
    Run {
        /// Script file
        script: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Execute commands given on the command line, in order
    Exec {
        /// Commands, e.g. "NewGroup nx=4 ny=4 nz=2"
        #[arg(required = true)]
        commands: Vec<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the usage line of one command kind, or of all kinds
    Usage {
        /// Command kind (case-insensitive)
        kind: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}
