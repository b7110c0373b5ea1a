//! Command-line front end of the `mlaa` binary

pub mod args;
pub mod run;

pub use args::{CliConfig, CliError, USAGE};
pub use run::{resolve_config, run, run_cli};
