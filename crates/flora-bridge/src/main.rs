//! Flora Bridge - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tracing::{error, info, warn};

use flora_bridge::bridge::status;
use flora_bridge::config::Config;
use flora_bridge::db::Database;
use flora_bridge::models::SourceKind;
use flora_bridge::pipeline::{Orchestrator, StepSelection};
use flora_bridge::repair::{self, RepairMode};
use flora_bridge::{console, Cli, Commands};
use flora_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Console always; LOG_OUTPUT=both adds the rotating file for long runs
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("flora-bridge")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        },
    };

    match execute(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{} {:#}", "✗ Failed:".red().bold(), e);
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: &Cli) -> Result<()> {
    if let Commands::Steps = cli.command {
        console::print_catalogue();
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;

    match &cli.command {
        Commands::Run { steps, watchdog } => {
            let selection = match steps {
                Some(raw) => StepSelection::parse(raw)?,
                None => console::prompt_selection()?,
            };

            let mut db = connect(&config).await?;
            if *watchdog {
                db.set_watchdog(Some(config.database.stall_threshold()));
            }

            let report = Orchestrator::new(&mut db, &config).run(&selection).await;
            close(db).await;

            let elapsed = report.finished_at - report.started_at;
            let completed = report.completed.len();
            report.into_result()?;
            println!(
                "{} {} step(s) completed in {}s",
                "✓ Success:".green().bold(),
                completed,
                elapsed.num_seconds()
            );
        },
        Commands::Repair { counts_only } => {
            let mode = if *counts_only {
                RepairMode::CountsOnly
            } else {
                RepairMode::Full
            };

            let mut db = connect(&config).await?;
            let outcome = repair::run(&mut db, &config, mode).await;
            close(db).await;

            let report = outcome?;
            println!(
                "{} repair ({}) propagated {}, flowed {}, recounted {}",
                "✓ Success:".green().bold(),
                report.mode,
                report.literals_propagated,
                report.literals_flowed,
                report.counts_updated
            );
        },
        Commands::Status { json } => {
            let mut db = connect(&config).await?;
            let outcome = print_status(&mut db, *json).await;
            close(db).await;
            outcome?;
        },
        Commands::Steps => {},
    }

    Ok(())
}

/// Connect using the configured URL, or prompt the operator for credentials
async fn connect(config: &Config) -> Result<Database> {
    let options = match config.database.connect_options()? {
        Some(options) => options,
        None => console::prompt_credentials()?.connect_options(),
    };

    let db = Database::connect(options, &config.database)
        .await
        .context("Failed to connect to the database")?;
    info!("Connected");
    Ok(db)
}

async fn close(db: Database) {
    if let Err(e) = db.close().await {
        warn!(error = %e, "Closing the database connection failed");
    }
}

async fn print_status(db: &mut Database, json: bool) -> Result<()> {
    if json {
        let rows = status::report(db).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", "Staging".bold());
    for kind in SourceKind::ALL {
        let rows = status::staging_rows(db, kind.staging_table()).await?;
        println!(
            "  {:<18} {}",
            kind.staging_table(),
            rows.map(|r| r.to_string()).unwrap_or_else(|| "missing".to_string())
        );
    }

    println!("{}", "Canonical taxa".bold());
    println!(
        "  {:<14} {:>12} {:>12} {:>12} {:>16}",
        "source", "rows", "unresolved", "no path", "synonym parent"
    );
    for row in status::report(db).await? {
        println!(
            "  {:<14} {:>12} {:>12} {:>12} {:>16}",
            row.source, row.total, row.unresolved, row.without_path, row.synonym_parents
        );
    }
    Ok(())
}
