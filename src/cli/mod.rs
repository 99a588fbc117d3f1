//! Command-line interface for fieldforge.
//!
//! Provides commands for queue inspection, production, worker runs, and
//! the learning loop.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
