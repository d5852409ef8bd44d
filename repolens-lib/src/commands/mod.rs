//! Command-line interface and orchestration for repolens
//!
//! This module implements the CLI commands and wires the GitHub client into the
//! pipeline. It handles argument parsing, configuration management, progress display,
//! and the console summary.
//!
//! # Implementation Model
//!
//! ## Commands
//!
//! - **scan**: Enumerate an account's repositories (plus any organizations), analyze
//!   them under the rate governor, checkpoint progress, and print the aggregate summary
//! - **init**: Generate a default configuration file
//! - **validate**: Check a configuration file's syntax and value ranges
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes
//! to the appropriate command handler. A scan:
//!
//! 1. Sets up logging and loads the configuration
//! 2. Builds the scope, the GitHub client, the rate governor, and the checkpoint store
//! 3. Runs the orchestrator with a progress reporter and a Ctrl-C handler
//! 4. Writes the JSON report if asked, then prints the summary
//!
//! The exit code tells a completed run (0) from one that ran out of quota (2)
//! or was interrupted (130).

mod common;
mod config;
mod host;
mod init;
mod progress_reporter;
mod run;
mod scan;
mod summary;
mod validate;

#[cfg(debug_assertions)]
pub use config::Config;

pub use host::Host;
pub use init::{InitArgs, init_config};
pub use progress_reporter::ProgressReporter;
pub use run::run;
pub use scan::{ScanArgs, ScanMode, process_scan};
pub use validate::{ValidateArgs, validate_config};
