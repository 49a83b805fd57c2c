//! Comprobador: command-line front end for Comprobar
//!
//! Runs verification scripts against a live Chromium, prints a per-step
//! report and writes JSON, HTML or JUnit output for CI.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
mod output;
mod runner;

pub use commands::{
    Cli, ColorArg, Commands, CompareArgs, InitArgs, ReportArgs, RunArgs, ValidateArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::ProgressReporter;
pub use runner::{describe_steps, effective_config, ScriptRunner, STARTER_SCRIPT};
