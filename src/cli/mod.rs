//! Command-line interface for hookline.
//!
//! Provides the worker process (`run`) and operator commands for enqueueing,
//! inspecting and replaying jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
