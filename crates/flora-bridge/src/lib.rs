//! Flora Bridge Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Offline pipeline merging two plant-name authorities into one canonical
//! `taxa` hierarchy with materialized paths and child counts.
//!
//! # Overview
//!
//! - **Connection manager** ([`db`]): one explicit connection, checked before use,
//!   with bounded retries and an optional stall watchdog
//! - **Segment planner** ([`segments`]): half-open name ranges that keep every
//!   statement bounded and resumable
//! - **Orchestrator** ([`pipeline`]): sixteen catalogued steps run in dependency
//!   order from an operator selection
//! - **Bridging engine** ([`bridge`]): stage, populate, link, graft, dereference,
//!   propagate, paths, counts, indexes
//! - **Repair** ([`repair`]): re-convergence pass under the watchdog
//!
//! # Example
//!
//! ```no_run
//! use flora_bridge::config::Config;
//! use flora_bridge::db::Database;
//! use flora_bridge::pipeline::{Orchestrator, StepSelection};
//!
//! # async fn example() -> flora_bridge::error::BridgeResult<()> {
//! let config = Config::load()?;
//! let options = config.database.connect_options()?.unwrap_or_default();
//! let mut db = Database::connect(options, &config.database).await?;
//!
//! let selection = StepSelection::parse("9-15")?;
//! let report = Orchestrator::new(&mut db, &config).run(&selection).await;
//! db.close().await?;
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod repair;
pub mod segments;

use clap::{Parser, Subcommand};

pub use error::{BridgeError, BridgeResult};

/// Flora taxonomic bridging pipeline
#[derive(Parser, Debug)]
#[command(name = "flora-bridge")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Debug-level console logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run pipeline steps
    Run {
        /// Step selection: number, name, list (4,5,6), range (6-11) or "all";
        /// prompts when omitted
        #[arg(short, long, env = "FLORA_STEPS")]
        steps: Option<String>,

        /// Diagnose statements that stall past the threshold
        #[arg(short, long)]
        watchdog: bool,
    },

    /// Re-converge literals and recompute child counts
    Repair {
        /// Only recompute child counts
        #[arg(long)]
        counts_only: bool,
    },

    /// List the step catalogue
    Steps,

    /// Summarize the canonical table
    Status {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from(["flora-bridge", "run", "--steps", "6-11", "--watchdog"]).unwrap();
        match cli.command {
            Commands::Run { steps, watchdog } => {
                assert_eq!(steps.as_deref(), Some("6-11"));
                assert!(watchdog);
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["flora-bridge", "repair", "--counts-only", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Repair { counts_only: true }));
    }
}
