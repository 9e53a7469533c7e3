//! Deduplication-aware import of canonical rows
//!
//! Rows arrive either as canonical CSV (the parse stage's output, possibly hand-edited) or
//! as structured [`ImportRow`] records. Each row is validated on its own; a bad row is
//! skipped with a reason and never aborts the batch. Everything that passes is inserted
//! in one transaction together with a full aggregation rebuild, so the transaction store
//! and the monthly aggregates always commit together.

use rusqlite::TransactionBehavior;
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::AggregationEngine;
use crate::config::CategoryMap;
use crate::db::{find_duplicate, insert_transaction, Database};
use crate::error::{Error as CoreError, Result};
use crate::models::{
    Direction, ImportResult, ImportRow, NewTransaction, RebuildScope, RowDiagnostic,
};
use crate::normalize::{parse_timestamp, STANDARD_COLUMNS};
use crate::parse::{generic, strip_bom, RawTable};

/// Why a single row was skipped
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount must not be negative: {0}")]
    NegativeAmount(String),

    #[error("unknown direction (expected 收入 or 支出): {0}")]
    UnknownDirection(String),
}

/// Check one row and convert it into an insertable transaction
pub fn validate_row(row: &ImportRow) -> std::result::Result<NewTransaction, RowError> {
    let time = required(&row.time, "time")?;
    let category = required(&row.category, "category")?;
    let amount = required(&row.amount, "amount")?;
    let direction = required(&row.direction, "direction")?;

    let timestamp =
        parse_timestamp(time).ok_or_else(|| RowError::InvalidTimestamp(time.to_string()))?;

    let value: f64 = amount
        .replace(',', "")
        .parse()
        .map_err(|_| RowError::InvalidAmount(amount.to_string()))?;
    if !value.is_finite() {
        return Err(RowError::InvalidAmount(amount.to_string()));
    }
    if value < 0.0 {
        return Err(RowError::NegativeAmount(amount.to_string()));
    }

    let direction: Direction = direction
        .parse()
        .map_err(|_| RowError::UnknownDirection(direction.to_string()))?;

    Ok(NewTransaction {
        timestamp,
        category: category.to_string(),
        amount: value,
        direction,
        payment_method: optional(&row.payment_method),
        counterparty: optional(&row.counterparty),
        item: optional(&row.item),
        remark: optional(&row.remark),
    })
}

fn required<'r>(value: &'r str, field: &'static str) -> std::result::Result<&'r str, RowError> {
    let value = value.trim();
    if value.is_empty() {
        Err(RowError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Read canonical CSV into import rows
///
/// The four required columns must be present in the header, otherwise the whole batch is
/// rejected.
pub fn read_canonical_csv(text: &str) -> Result<Vec<ImportRow>> {
    let (body, _) = strip_bom(text.as_bytes());
    let text = String::from_utf8_lossy(body);
    if text.trim().is_empty() {
        return Err(CoreError::InvalidData("Import file is empty".to_string()));
    }

    let table = RawTable::from_csv_text(&text)?;
    canonical_rows(&table)
}

/// Read a canonical CSV file's raw bytes into import rows
///
/// Accepts the same encodings as the generic template parser (UTF-8 with or without a BOM,
/// or GBK), so a template saved by a spreadsheet tool imports without conversion.
pub fn read_canonical_bytes(bytes: &[u8]) -> Result<Vec<ImportRow>> {
    if strip_bom(bytes).0.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(CoreError::InvalidData("Import file is empty".to_string()));
    }
    let decoded = generic::parse(bytes)?;
    debug!("Canonical import decoded as {}", decoded.encoding);
    canonical_rows(&decoded.table)
}

fn canonical_rows(table: &RawTable) -> Result<Vec<ImportRow>> {
    let cols = &STANDARD_COLUMNS;

    let require = |aliases: &[&str], name: &str| {
        table.column(aliases).ok_or_else(|| {
            CoreError::InvalidData(format!(
                "Import file is missing the required '{}' column ({})",
                name,
                aliases.join(" / ")
            ))
        })
    };
    let time = require(cols.time, "time")?;
    let category = require(cols.category, "category")?;
    let amount = require(cols.amount, "amount")?;
    let direction = require(cols.direction, "direction")?;

    let payment_method = table.column(cols.payment_method);
    let counterparty = table.column(cols.counterparty);
    let item = table.column(cols.item);
    let remark = table.column(cols.remark);

    let cell = |row: &[String], col: Option<usize>| -> String {
        col.and_then(|i| row.get(i)).cloned().unwrap_or_default()
    };

    Ok(table
        .rows
        .iter()
        .map(|row| ImportRow {
            time: cell(row, Some(time)),
            category: cell(row, Some(category)),
            amount: cell(row, Some(amount)),
            direction: cell(row, Some(direction)),
            payment_method: cell(row, payment_method),
            counterparty: cell(row, counterparty),
            item: cell(row, item),
            remark: cell(row, remark),
        })
        .collect())
}

/// Imports canonical rows into the transaction store
pub struct Importer<'a> {
    db: &'a Database,
    deduplicate: bool,
    categories: &'a CategoryMap,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            deduplicate: true,
            categories: CategoryMap::builtin(),
        }
    }

    /// Toggle duplicate detection (on by default)
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    /// Category mapping for the rebuild that follows the import
    pub fn with_categories(mut self, categories: &'a CategoryMap) -> Self {
        self.categories = categories;
        self
    }

    /// Import canonical CSV text
    pub fn import_csv(&self, text: &str) -> Result<ImportResult> {
        let rows = read_canonical_csv(text)?;
        self.import_rows(&rows)
    }

    /// Import a canonical CSV file from raw bytes
    pub fn import_canonical_bytes(&self, bytes: &[u8]) -> Result<ImportResult> {
        let rows = read_canonical_bytes(bytes)?;
        self.import_rows(&rows)
    }

    /// Import structured rows
    ///
    /// Diagnostics number rows as `index + 2`, the line number in a headed file.
    pub fn import_rows(&self, rows: &[ImportRow]) -> Result<ImportResult> {
        if rows.is_empty() {
            return Err(CoreError::InvalidData("No rows to import".to_string()));
        }

        let mut conn = self.db.conn()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut result = ImportResult::default();

        for (index, row) in rows.iter().enumerate() {
            let line = index + 2;

            let new_tx = match validate_row(row) {
                Ok(new_tx) => new_tx,
                Err(e) => {
                    debug!("Skipping row {}: {}", line, e);
                    result.skipped_rows.push(RowDiagnostic {
                        row: line,
                        data: row.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if self.deduplicate {
                // Sees rows inserted earlier in this batch too
                if let Some(existing) = find_duplicate(&tx, &new_tx)? {
                    debug!("Row {} duplicates transaction #{}", line, existing);
                    result.duplicate_rows.push(RowDiagnostic {
                        row: line,
                        data: row.clone(),
                        reason: format!("duplicate of transaction #{}", existing),
                    });
                    continue;
                }
            }

            insert_transaction(&tx, &new_tx)?;
            result.imported += 1;
        }

        result.skipped = result.skipped_rows.len();
        result.duplicate = result.duplicate_rows.len();

        result.aggregation = AggregationEngine::new(self.db)
            .with_categories(self.categories)
            .run_in(&mut tx, RebuildScope::All, None)?;

        tx.commit()?;

        info!(
            "Import committed: {} imported, {} skipped, {} duplicate; {} months aggregated",
            result.imported, result.skipped, result.duplicate, result.aggregation.processed_months
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(time: &str, amount: &str, counterparty: &str, item: &str) -> ImportRow {
        ImportRow {
            time: time.to_string(),
            category: "餐饮".to_string(),
            amount: amount.to_string(),
            direction: "支出".to_string(),
            payment_method: "支付宝".to_string(),
            counterparty: counterparty.to_string(),
            item: item.to_string(),
            remark: String::new(),
        }
    }

    #[test]
    fn test_validate_row_trims_and_nulls_blanks() {
        let mut input = row(" 2024-01-15 14:30:00 ", " 25.50 ", "某餐厅", "  ");
        input.remark = String::new();
        let tx = validate_row(&input).unwrap();
        assert_eq!(tx.amount, 25.5);
        assert_eq!(tx.direction, Direction::Expense);
        assert_eq!(tx.counterparty.as_deref(), Some("某餐厅"));
        assert!(tx.item.is_none());
        assert!(tx.remark.is_none());
    }

    #[test]
    fn test_validate_row_errors() {
        let mut missing = row("2024-01-15 14:30:00", "25.5", "", "");
        missing.category = "  ".to_string();
        assert_eq!(
            validate_row(&missing).unwrap_err(),
            RowError::MissingField("category")
        );

        assert!(matches!(
            validate_row(&row("yesterday", "25.5", "", "")).unwrap_err(),
            RowError::InvalidTimestamp(_)
        ));
        assert!(matches!(
            validate_row(&row("2024-01-15 14:30:00", "abc", "", "")).unwrap_err(),
            RowError::InvalidAmount(_)
        ));
        assert!(matches!(
            validate_row(&row("2024-01-15 14:30:00", "NaN", "", "")).unwrap_err(),
            RowError::InvalidAmount(_)
        ));

        let mut neutral = row("2024-01-15 14:30:00", "25.5", "", "");
        neutral.direction = "不计收支".to_string();
        assert!(matches!(
            validate_row(&neutral).unwrap_err(),
            RowError::UnknownDirection(_)
        ));
    }

    #[test]
    fn test_negative_amount_reason_mentions_amount() {
        let db = Database::in_memory().unwrap();
        let result = Importer::new(&db)
            .import_rows(&[row("2024-01-15 14:30:00", "-10", "某餐厅", "午餐")])
            .unwrap();

        assert_eq!(result.imported, 0);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.skipped_rows[0].row, 2);
        assert!(result.skipped_rows[0].reason.contains("amount"));
        assert_eq!(result.skipped_rows[0].data.amount, "-10");
    }

    #[test]
    fn test_second_import_is_duplicate() {
        let db = Database::in_memory().unwrap();
        let rows = [row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐")];

        let first = Importer::new(&db).import_rows(&rows).unwrap();
        assert_eq!(first.imported, 1);

        let second = Importer::new(&db).import_rows(&rows).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.duplicate, 1);
        assert!(second.duplicate_rows[0].reason.starts_with("duplicate"));
        assert_eq!(db.count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let db = Database::in_memory().unwrap();
        let rows = [
            row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐"),
            row("2024-01-15 14:30:00", "25.5", "某餐厅", "午餐"),
        ];

        let result = Importer::new(&db).import_rows(&rows).unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.duplicate, 1);
        assert_eq!(result.duplicate_rows[0].row, 3);
    }

    #[test]
    fn test_dedup_disabled_imports_everything() {
        let db = Database::in_memory().unwrap();
        let rows = [
            row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐"),
            row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐"),
        ];

        let result = Importer::new(&db).deduplicate(false).import_rows(&rows).unwrap();
        assert_eq!(result.imported, 2);
        assert_eq!(result.duplicate, 0);
    }

    #[test]
    fn test_bad_rows_do_not_abort_batch() {
        let db = Database::in_memory().unwrap();
        let rows = [
            row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐"),
            row("", "1", "", ""),
            row("2024-01-16 09:00:00", "x", "", ""),
            row("2024-01-17 09:00:00", "12", "地铁", ""),
        ];

        let result = Importer::new(&db).import_rows(&rows).unwrap();
        assert_eq!(result.imported, 2);
        assert_eq!(result.skipped, 2);
        let lines: Vec<usize> = result.skipped_rows.iter().map(|d| d.row).collect();
        assert_eq!(lines, vec![3, 4]);
    }

    #[test]
    fn test_import_rebuilds_aggregates() {
        let db = Database::in_memory().unwrap();
        let result = Importer::new(&db)
            .import_rows(&[
                row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐"),
                row("2024-02-01 08:00:00", "4.5", "早餐店", "包子"),
            ])
            .unwrap();

        assert_eq!(result.aggregation.processed_months, 2);
        assert_eq!(result.aggregation.created, 2);
        assert_eq!(db.stats().unwrap().aggregate_count, 2);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let db = Database::in_memory().unwrap();
        let err = Importer::new(&db).import_rows(&[]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidData(_)));

        let err = Importer::new(&db).import_csv("\u{feff}  \n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidData(_)));
    }

    #[test]
    fn test_import_csv_requires_columns() {
        let db = Database::in_memory().unwrap();
        let err = Importer::new(&db)
            .import_csv("交易时间,类型,收支\n2024-01-15 14:30:00,餐饮,支出\n")
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidData(_)));
        assert!(err.to_string().contains("amount"));
        assert_eq!(db.count_transactions().unwrap(), 0);
    }

    #[test]
    fn test_import_csv_canonical_and_english_headers() {
        let db = Database::in_memory().unwrap();
        let canonical = "\u{feff}交易时间,类型,金额,收支,支付方式,交易对方,商品名称,备注\n\
            2024-01-15 14:30:00,餐饮,25.50,支出,支付宝,某餐厅,午餐,\n";
        let result = Importer::new(&db).import_csv(canonical).unwrap();
        assert_eq!(result.imported, 1);

        let english = "time,category,amount,direction\n2024-01-16 10:00:00,交通,3,expense\n";
        let result = Importer::new(&db).import_csv(english).unwrap();
        assert_eq!(result.imported, 1);

        let tx = &db.list_transactions(None, None).unwrap()[0];
        assert_eq!(tx.category, "交通");
        assert!(tx.payment_method.is_none());
    }

    #[test]
    fn test_import_canonical_bytes_gbk_and_negative_amount() {
        let db = Database::in_memory().unwrap();
        let text = "交易时间,类型,金额,收支,支付方式,交易对方,商品名称,备注\n\
            2024-01-15 14:30:00,餐饮,25.50,支出,支付宝,某餐厅,午餐,\n\
            2024-01-16 09:00:00,餐饮,-10,支出,,,,\n";
        let (gbk, _, _) = encoding_rs::GBK.encode(text);

        let result = Importer::new(&db).import_canonical_bytes(&gbk).unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.skipped_rows[0].row, 3);
        assert!(result.skipped_rows[0].reason.contains("amount"));
        assert_eq!(db.list_transactions(None, None).unwrap()[0].counterparty.as_deref(), Some("某餐厅"));

        let err = Importer::new(&db).import_canonical_bytes(b"\xEF\xBB\xBF \n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidData(_)));
    }

    #[test]
    fn test_failed_rebuild_rolls_back_import() {
        let db = Database::in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER block_aggregates BEFORE INSERT ON monthly_aggregates
                 BEGIN SELECT RAISE(ABORT, 'aggregates unavailable'); END;",
            )
            .unwrap();

        let err = Importer::new(&db)
            .import_rows(&[row("2024-01-15 14:30:00", "25.50", "某餐厅", "午餐")])
            .unwrap_err();
        assert!(matches!(err, CoreError::Aggregation(_)));
        assert_eq!(db.count_transactions().unwrap(), 0);
    }
}
