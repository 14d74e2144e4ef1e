//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - catalog: load a criteria catalog and list its stages
//! - validate: check a stage output file against its criteria
//! - run: drive a shell-command stage until it passes

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stageloop - criteria-driven retry loops for pipeline stages
#[derive(Parser, Debug)]
#[command(name = "stageloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a criteria catalog and list its stages
    Catalog {
        /// Catalog file (YAML or JSON); defaults to catalog.path from config
        path: Option<PathBuf>,
    },

    /// Validate a stage output file against the catalog
    Validate {
        /// Catalog file; defaults to catalog.path from config
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Stage whose criteria apply
        #[arg(short, long)]
        stage: String,

        /// JSON file holding the stage output
        output: PathBuf,

        /// Iteration number to report
        #[arg(long, default_value_t = 1)]
        iteration: u32,

        /// Iteration ceiling used for the retry decision
        #[arg(long)]
        max_iterations: Option<u32>,

        /// External state fact as key=value (value parsed as JSON when possible)
        #[arg(long = "fact")]
        facts: Vec<String>,
    },

    /// Run a shell-command stage until its output passes validation
    Run {
        /// Catalog file; defaults to catalog.path from config
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Stage whose criteria apply
        #[arg(short, long)]
        stage: String,

        /// Shell command; receives the input JSON on stdin, prints output JSON
        #[arg(long = "exec")]
        exec: String,

        /// JSON file holding the stage input (defaults to {})
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override the iteration ceiling
        #[arg(long)]
        max_iterations: Option<u32>,

        /// External state fact as key=value (value parsed as JSON when possible)
        #[arg(long = "fact")]
        facts: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog() {
        let cli = Cli::try_parse_from(["stageloop", "catalog", "criteria.yml"]).unwrap();
        match cli.command {
            Commands::Catalog { path } => assert_eq!(path, Some(PathBuf::from("criteria.yml"))),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::try_parse_from([
            "stageloop",
            "-v",
            "validate",
            "--stage",
            "scrape",
            "--iteration",
            "2",
            "--fact",
            "saved=true",
            "out.json",
        ])
        .unwrap();
        assert!(cli.is_verbose());
        match cli.command {
            Commands::Validate {
                stage,
                output,
                iteration,
                facts,
                catalog,
                max_iterations,
            } => {
                assert_eq!(stage, "scrape");
                assert_eq!(output, PathBuf::from("out.json"));
                assert_eq!(iteration, 2);
                assert_eq!(facts, vec!["saved=true"]);
                assert!(catalog.is_none());
                assert!(max_iterations.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "stageloop",
            "run",
            "--stage",
            "draft",
            "--exec",
            "./draft.sh",
            "--max-iterations",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                stage,
                exec,
                max_iterations,
                input,
                ..
            } => {
                assert_eq!(stage, "draft");
                assert_eq!(exec, "./draft.sh");
                assert_eq!(max_iterations, Some(3));
                assert!(input.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["stageloop"]).is_err());
    }
}
