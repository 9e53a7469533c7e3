//! Rebuild command - recompute monthly aggregates from stored transactions
//!
//! Runs the base aggregation for the requested scope, then refreshes the derived
//! averages for every month. The whole job commits or rolls back as one unit.

use anyhow::{Context, Result};

use tally_core::config::CategoryMap;
use tally_core::models::RebuildScope;
use tally_core::{AggregationEngine, Database};

pub fn cmd_rebuild(
    db: &Database,
    categories: &CategoryMap,
    year: Option<i32>,
    month: Option<u32>,
) -> Result<()> {
    let scope = RebuildScope::from_parts(year, month).context("Invalid rebuild scope")?;

    let recovered = db.recover_interrupted_rebuilds()?;
    if recovered > 0 {
        println!(
            "   ⚠️  Marked {} interrupted rebuild(s) as failed",
            recovered
        );
    }

    println!("🔄 Rebuilding monthly aggregates ({})...", scope);

    let result = AggregationEngine::new(db)
        .with_categories(categories)
        .rebuild(scope)
        .context("Rebuild failed; aggregates were left unchanged")?;

    println!("✅ Rebuild complete!");
    println!("   Months processed: {}", result.processed_months);
    println!("   Created: {}", result.created);
    println!("   Updated: {}", result.updated);

    Ok(())
}
