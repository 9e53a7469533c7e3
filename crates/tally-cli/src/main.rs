//! Tally CLI - Statement ingestion and monthly aggregation
//!
//! Usage:
//!   tally init                      Initialize database
//!   tally parse bill.csv --out x    Convert a statement to canonical CSV
//!   tally import bill.csv           Parse, deduplicate, and import a statement
//!   tally rebuild --year 2024       Recompute monthly aggregates
//!   tally serve --port 3000         Start web server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Parse { file, out, format } => {
            commands::cmd_parse(&file, out.as_deref(), format.as_deref())
        }
        Commands::Import {
            file,
            format,
            no_dedup,
            show_skipped,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let categories = commands::load_categories(cli.config.as_deref())?;
            commands::cmd_import(
                &db,
                &categories,
                &file,
                format.as_deref(),
                !no_dedup,
                show_skipped,
            )
            .map(|_| ())
        }
        Commands::Export { from, to, out } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_export(&db, from.as_deref(), to.as_deref(), out.as_deref())
        }
        Commands::Rebuild { year, month } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let categories = commands::load_categories(cli.config.as_deref())?;
            commands::cmd_rebuild(&db, &categories, year, month)
        }
        Commands::Stats => commands::cmd_stats(&cli.db, cli.no_encrypt),
        Commands::Months => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_months(&db)
        }
        Commands::Serve {
            port,
            host,
            no_auth,
        } => {
            commands::cmd_serve(
                &cli.db,
                &host,
                port,
                no_auth,
                cli.no_encrypt,
                cli.config.as_deref(),
            )
            .await
        }
    }
}
