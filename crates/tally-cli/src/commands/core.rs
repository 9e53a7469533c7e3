//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_categories` - Category mapping from --config or the default location
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::config::{default_config_path, CategoryMap};
use tally_core::db::Database;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", db_path.display()))?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load the category mapping used by imports and rebuilds
pub fn load_categories(config: Option<&Path>) -> Result<CategoryMap> {
    CategoryMap::load(config).context("Failed to load category mapping")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    let recovered = db
        .recover_interrupted_rebuilds()
        .context("Failed to check rebuild journal")?;
    if recovered > 0 {
        println!(
            "   ⚠️  {} interrupted rebuild(s) found; run 'tally rebuild'",
            recovered
        );
    }

    if !db.is_encrypted() {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    if let Some(path) = default_config_path() {
        if path.exists() {
            println!("   Category mapping: {}", path.display());
        } else {
            println!("   Category mapping: built-in (override at {})", path.display());
        }
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Convert a statement: tally parse alipay_record.csv --out bill.csv");
    println!("  2. Fill in the 类型 column, then import: tally import bill.csv");
    println!("  3. Review monthly totals: tally months");

    Ok(())
}
