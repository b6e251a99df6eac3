//! Command line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file, merged over every other source
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List a directory on the device
    Ls {
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a directory on the device
    Mkdir { path: String },
    /// Upload a file or a directory tree
    Put {
        /// Local file or directory
        local: PathBuf,
        /// Destination path, or upload root for directories
        device_path: Option<String>,
    },
    /// Rename a file or directory on the device
    Mv { old: String, new: String },
    /// Delete a file or directory tree on the device
    Rm { path: String },
    /// Print a device file to stdout
    Cat { path: String },
    /// Run a local script on the device and echo its output
    Run { script: PathBuf },
    /// Execute a single statement in raw mode and print what it printed
    Exec { code: String },
    /// Interactive REPL over stdin
    Repl,
    /// Print the effective configuration as TOML
    Config,
}
