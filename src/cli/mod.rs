//! CLI module for stageloop - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for inspecting catalogs,
//! validating stage outputs, and running command-backed stages.

pub mod commands;

pub use commands::Cli;
