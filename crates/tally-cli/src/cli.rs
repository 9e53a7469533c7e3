//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Statement ingestion and monthly spending aggregates
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Import Alipay/WeChat Pay statements and track monthly consumption", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Category mapping file (TOML)
    ///
    /// Defaults to categories.toml in the platform data directory, falling back to the
    /// built-in mapping when that file does not exist.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Parse a statement into canonical CSV without importing it
    Parse {
        /// Statement file (Alipay CSV, WeChat CSV/xlsx, or template CSV)
        file: PathBuf,

        /// Write canonical CSV here (prints diagnostics only if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Statement format: alipay, wechat, wechat_xlsx, standard (auto-detected if not specified)
        #[arg(long)]
        format: Option<String>,
    },

    /// Parse a statement and import its rows
    Import {
        /// Statement or canonical CSV file
        file: PathBuf,

        /// Statement format (auto-detected if not specified)
        #[arg(long)]
        format: Option<String>,

        /// Import rows even if they look like duplicates
        #[arg(long)]
        no_dedup: bool,

        /// List every skipped and duplicate row with its reason
        #[arg(long)]
        show_skipped: bool,
    },

    /// Export stored transactions as canonical CSV
    Export {
        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        to: Option<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Rebuild monthly aggregates from stored transactions
    Rebuild {
        /// Limit the base aggregation to one year
        #[arg(long)]
        year: Option<i32>,

        /// Limit the base aggregation to one month (requires --year)
        #[arg(long, requires = "year")]
        month: Option<u32>,
    },

    /// Show database status and aggregation statistics
    Stats,

    /// List monthly aggregates
    Months,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires a bearer key from TALLY_API_KEYS.
        #[arg(long)]
        no_auth: bool,
    },
}
