//! Canonical CSV output
//!
//! Both the parse stage and the transaction export emit the same layout: UTF-8 with a BOM
//! (so spreadsheet tools pick the right encoding), the eight canonical headers, one row per
//! transaction. Output of either feeds straight back into the importer.

use chrono::NaiveDate;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::CANONICAL_HEADERS;

/// UTF-8 byte-order mark
pub const BOM: &str = "\u{feff}";

/// Render records in canonical column order as CSV text with a BOM
pub fn write_canonical_csv<I>(records: I) -> Result<String>
where
    I: IntoIterator<Item = [String; 8]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CANONICAL_HEADERS)?;
    for record in records {
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    let body = String::from_utf8(bytes)
        .map_err(|e| Error::InvalidData(format!("CSV output is not UTF-8: {}", e)))?;

    Ok(format!("{}{}", BOM, body))
}

impl Database {
    /// Export stored transactions as canonical CSV, newest first
    ///
    /// Both bounds are inclusive dates.
    pub fn export_canonical_csv(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<String> {
        let transactions = self.list_transactions(from, to)?;
        write_canonical_csv(
            transactions
                .iter()
                .map(|tx| tx.to_canonical_row().to_record()),
        )
    }
}
