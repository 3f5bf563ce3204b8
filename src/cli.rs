//! Command-line entry point for the harness

pub mod cli_app;

pub use cli_app::{run_cli, run_with, Cli, Commands};
