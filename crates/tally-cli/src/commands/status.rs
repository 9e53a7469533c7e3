//! Status-related command implementations (stats, months)

use std::fs;
use std::path::Path;

use anyhow::Result;
use tally_core::db::{Database, DB_KEY_ENV};

use super::open_db;

pub fn cmd_stats(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!();
    println!("📊 Tally Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
        println!();
        return Ok(());
    }

    match open_db(db_path, no_encrypt) {
        Ok(db) => {
            if db.is_encrypted() {
                println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
            } else {
                println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
            }
            print_store_stats(&db)?;
        }
        Err(e) => {
            let has_key = std::env::var(DB_KEY_ENV).is_ok();
            println!();
            println!("   ❌ Error opening database: {}", e);
            if !no_encrypt && !has_key {
                println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
            } else if has_key {
                println!("      (Check if {} is correct)", DB_KEY_ENV);
            }
        }
    }

    println!();
    Ok(())
}

/// Transaction counts, time span and the last rebuild
pub fn print_store_stats(db: &Database) -> Result<()> {
    let stats = db.stats()?;

    println!();
    println!("   Transactions: {}", stats.transaction_count);
    println!("   Monthly aggregates: {}", stats.aggregate_count);
    match (stats.earliest_ts, stats.latest_ts) {
        (Some(first), Some(last)) => println!("   Span: {} → {}", first, last),
        _ => println!("   Span: (no transactions)"),
    }

    if let Some(run) = db.list_rebuild_runs(1)?.into_iter().next() {
        println!();
        println!(
            "   Last rebuild: #{} {} ({}) at {}",
            run.id,
            run.status.as_str(),
            run.scope,
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = run.error {
            println!("      Error: {}", error);
        }
    }

    Ok(())
}

pub fn cmd_months(db: &Database) -> Result<()> {
    let aggregates = db.list_monthly_aggregates()?;

    if aggregates.is_empty() {
        println!("No monthly aggregates yet. Import a statement or run 'tally rebuild'.");
        return Ok(());
    }

    println!();
    println!(
        "{:<8} {:>10} {:>10} {:>10} {:>10} {:>12} {:>12}",
        "Month", "Housing", "Dining", "Salary", "Balance", "Avg", "Recent avg"
    );
    println!("{}", "─".repeat(80));

    for agg in &aggregates {
        println!(
            "{:<8} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12.2} {:>12.2}",
            agg.month_key.to_string(),
            agg.totals.housing,
            agg.totals.dining,
            agg.totals.salary,
            agg.balance,
            agg.avg_consumption,
            agg.recent_avg_consumption
        );
    }

    println!();
    println!("{} month(s)", aggregates.len());
    Ok(())
}
