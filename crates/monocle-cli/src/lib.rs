//! Monocle CLI library
//!
//! ## Architecture
//!
//! - [`cli`] - Command line argument definitions
//! - [`config`] - Layered configuration (defaults, files, environment)
//! - [`console`] - Status sink printing to the terminal
//! - [`commands`] - Command dispatch and execution
//! - [`error`] - CLI error types

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;

// Public API exports
pub use cli::{Cli, Commands};
pub use commands::{CommandContext, CommandDispatcher};
pub use config::{AppConfig, CliConfig};
pub use console::ConsoleSink;
pub use error::{CliError, Result};
