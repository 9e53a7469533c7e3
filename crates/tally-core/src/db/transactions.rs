//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_datetime, parse_timestamp_column, Database};
use crate::error::Result;
use crate::models::{Direction, NewTransaction, Transaction, TIMESTAMP_FORMAT};

const TRANSACTION_COLUMNS: &str = "id, timestamp, category, amount, direction, payment_method, \
     counterparty, item, remark, created_at, updated_at";

/// Find a stored transaction with the same duplicate signature
///
/// Timestamp and amount must match exactly. Counterparty and item match when the stored
/// value starts with the incoming one (which covers exact matches and stored values with
/// trailing padding); a missing incoming value only matches a NULL.
pub(crate) fn find_duplicate(conn: &Connection, tx: &NewTransaction) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            r#"
            SELECT id FROM transactions
            WHERE timestamp = ?1
              AND amount = ?2
              AND ((?3 IS NULL AND counterparty IS NULL)
                   OR (?3 IS NOT NULL AND substr(counterparty, 1, length(?3)) = ?3))
              AND ((?4 IS NULL AND item IS NULL)
                   OR (?4 IS NOT NULL AND substr(item, 1, length(?4)) = ?4))
            ORDER BY id
            LIMIT 1
            "#,
            params![
                tx.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                tx.amount,
                tx.counterparty,
                tx.item,
            ],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Insert a validated transaction, returning its id
pub(crate) fn insert_transaction(conn: &Connection, tx: &NewTransaction) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO transactions (timestamp, category, amount, direction, payment_method, counterparty, item, remark)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            tx.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            tx.category,
            tx.amount,
            tx.direction.as_str(),
            tx.payment_method,
            tx.counterparty,
            tx.item,
            tx.remark,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let timestamp: String = row.get(1)?;
    let direction: String = row.get(4)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(Transaction {
        id: row.get(0)?,
        timestamp: parse_timestamp_column(&timestamp)?,
        category: row.get(2)?,
        amount: row.get(3)?,
        direction: direction.parse::<Direction>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        payment_method: row.get(5)?,
        counterparty: row.get(6)?,
        item: row.get(7)?,
        remark: row.get(8)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

impl Database {
    /// List transactions newest first, optionally bounded by an inclusive date range
    pub fn list_transactions(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;

        // Stored timestamps sort lexically, so date strings bound them directly
        let lower = from.map(|d| d.format("%Y-%m-%d").to_string());
        let upper = to
            .and_then(|d| d.succ_opt())
            .map(|d| d.format("%Y-%m-%d").to_string());

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE (?1 IS NULL OR timestamp >= ?1)
              AND (?2 IS NULL OR timestamp < ?2)
            ORDER BY timestamp DESC, id DESC
            "#,
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(params![lower, upper], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Total number of stored transactions
    pub fn count_transactions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}
