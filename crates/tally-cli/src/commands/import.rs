//! Parse, import and export command implementations

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tally_core::{
    config::CategoryMap,
    db::Database,
    detect::detect_format,
    import::Importer,
    models::{ImportResult, ImportRow, ParseResult, RowDiagnostic, SourceFormat},
    parse::{parse_as, parse_statement},
};

/// Read a statement file and run the parse stage on it
pub fn read_statement(file: &Path, format: Option<&str>) -> Result<ParseResult> {
    let bytes =
        fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;

    let result = match format {
        Some(name) => {
            let format: SourceFormat = name.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            parse_as(&bytes, format)
        }
        None => {
            let filename = file.file_name().and_then(|n| n.to_str());
            parse_statement(&bytes, filename)
        }
    };

    result.with_context(|| format!("Failed to parse statement: {}", file.display()))
}

pub fn cmd_parse(file: &Path, out: Option<&Path>, format: Option<&str>) -> Result<()> {
    println!("🔍 Parsing {}...", file.display());

    let parsed = read_statement(file, format)?;
    let details = &parsed.details;

    println!("   Format: {}", details.format);
    println!("   Encoding: {}", details.encoding);
    println!("   Rows: {} read, {} kept, {} dropped", details.raw_rows, details.normalized_rows, details.dropped_rows);
    println!("   Signature: {}", details.file_signature);

    match out {
        Some(path) => {
            let csv = parsed.to_canonical_csv()?;
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            file.write_all(csv.as_bytes())?;

            println!("✅ Wrote {} canonical rows to {}", parsed.rows.len(), path.display());
            if parsed.rows.iter().any(|r| r.category.is_empty()) {
                println!();
                println!("💡 Tip: Fill in the 类型 column before importing; rows without a category are skipped");
            }
        }
        None => {
            println!("✅ Parsed {} rows (use --out to write canonical CSV)", parsed.rows.len());
        }
    }

    Ok(())
}

pub fn cmd_import(
    db: &Database,
    categories: &CategoryMap,
    file: &Path,
    format: Option<&str>,
    deduplicate: bool,
    show_skipped: bool,
) -> Result<ImportResult> {
    let bytes =
        fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;
    let format: SourceFormat = match format {
        Some(name) => name.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => detect_format(&bytes, file.file_name().and_then(|n| n.to_str())),
    };

    let importer = Importer::new(db)
        .deduplicate(deduplicate)
        .with_categories(categories);

    // Canonical files go straight to row validation so bad rows are reported, not repaired
    let outcome = if format == SourceFormat::Standard {
        println!("📥 Importing canonical rows from {}...", file.display());
        print_dedup_warning(deduplicate);
        importer.import_canonical_bytes(&bytes)
    } else {
        let parsed = parse_as(&bytes, format)
            .with_context(|| format!("Failed to parse statement: {}", file.display()))?;
        println!(
            "📥 Importing {} rows from {} ({})...",
            parsed.rows.len(),
            file.display(),
            format
        );
        if parsed.details.dropped_rows > 0 {
            println!(
                "   {} statement rows dropped during normalization",
                parsed.details.dropped_rows
            );
        }
        print_dedup_warning(deduplicate);

        let rows: Vec<ImportRow> = parsed.rows.iter().map(|r| r.to_import_row()).collect();
        importer.import_rows(&rows)
    };
    let result = outcome.context("Import failed; no rows were saved")?;

    print_import_result(&result, show_skipped);
    Ok(result)
}

fn print_dedup_warning(deduplicate: bool) {
    if !deduplicate {
        println!("   ⚠️  Duplicate detection DISABLED (--no-dedup)");
    }
}

/// Print import counts and, when asked, every skipped/duplicate row
pub fn print_import_result(result: &ImportResult, show_skipped: bool) {
    println!("✅ Import complete!");
    println!("   Imported: {}", result.imported);
    println!("   Skipped (invalid): {}", result.skipped);
    println!("   Skipped (duplicates): {}", result.duplicate);
    println!(
        "   Months aggregated: {} ({} new)",
        result.aggregation.processed_months, result.aggregation.created
    );

    if show_skipped {
        print_diagnostics("Skipped rows", &result.skipped_rows);
        print_diagnostics("Duplicate rows", &result.duplicate_rows);
    } else if result.skipped > 0 {
        println!();
        println!("💡 Tip: Run with --show-skipped to see why rows were skipped");
    }
}

fn print_diagnostics(title: &str, rows: &[RowDiagnostic]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("   {}:", title);
    for diag in rows {
        println!(
            "   line {:>4}  {}  {}  {}  → {}",
            diag.row,
            diag.data.time,
            diag.data.amount,
            super::truncate(&diag.data.counterparty, 24),
            diag.reason
        );
    }
}

/// Parse an optional YYYY-MM-DD flag
pub fn parse_date_flag(value: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("Invalid {} date format (use YYYY-MM-DD)", flag))
}

pub fn cmd_export(
    db: &Database,
    from: Option<&str>,
    to: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let from_date = parse_date_flag(from, "--from")?;
    let to_date = parse_date_flag(to, "--to")?;

    let csv = db.export_canonical_csv(from_date, to_date)?;

    match out {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            file.write_all(csv.as_bytes())?;

            let lines = csv.lines().count().saturating_sub(1); // Subtract header
            println!("✅ Exported {} transactions to {}", lines, path.display());
        }
        None => {
            // Write to stdout
            print!("{}", csv);
        }
    }

    Ok(())
}
