//! Monthly aggregate storage and the rebuild journal
//!
//! Only the aggregation engine writes here. The write helpers take a `&Connection` so the
//! engine can run them inside its own transaction.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{
    CategoryTotals, Direction, MonthKey, MonthlyAggregate, RebuildRun, RebuildScope,
    RebuildStatus,
};

const AGGREGATE_COLUMNS: &str = "id, month_key, housing, dining, living, entertainment, \
     transportation, travel, gifts, transactions, social_expenses, salary, balance, \
     avg_consumption, recent_avg_consumption, created_at, updated_at";

/// Whether an upsert created a new month row or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpsertOutcome {
    Created,
    Updated,
}

/// Sum of one category/direction pair within a month
#[derive(Debug, Clone)]
pub(crate) struct MonthCategoryTotal {
    pub month: MonthKey,
    pub category: String,
    pub direction: Direction,
    pub total: f64,
}

/// Timestamp bounds `[start, end)` for a scope, as stored strings
fn scope_bounds(scope: RebuildScope) -> (Option<String>, Option<String>) {
    let fmt = |d: NaiveDate| d.format("%Y-%m-%d").to_string();
    match scope {
        RebuildScope::All => (None, None),
        RebuildScope::Year { year } => (
            NaiveDate::from_ymd_opt(year, 1, 1).map(fmt),
            NaiveDate::from_ymd_opt(year + 1, 1, 1).map(fmt),
        ),
        RebuildScope::Month { month } => {
            let (start, end) = month.bounds();
            (Some(fmt(start.date())), Some(fmt(end.date())))
        }
    }
}

/// Per-month, per-category, per-direction sums of transaction magnitudes in scope
pub(crate) fn month_totals(
    conn: &Connection,
    scope: RebuildScope,
) -> Result<Vec<MonthCategoryTotal>> {
    let (start, end) = scope_bounds(scope);

    let mut stmt = conn.prepare(
        r#"
        SELECT substr(timestamp, 1, 7) AS month, category, direction, SUM(amount)
        FROM transactions
        WHERE (?1 IS NULL OR timestamp >= ?1)
          AND (?2 IS NULL OR timestamp < ?2)
        GROUP BY month, category, direction
        ORDER BY month, category, direction
        "#,
    )?;

    let rows = stmt
        .query_map(params![start, end], |row| {
            let month: String = row.get(0)?;
            let direction: String = row.get(2)?;
            Ok((month, row.get::<_, String>(1)?, direction, row.get::<_, f64>(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(month, category, direction, total)| {
            Ok(MonthCategoryTotal {
                month: month.parse().map_err(crate::error::Error::InvalidData)?,
                category,
                direction: direction
                    .parse()
                    .map_err(crate::error::Error::InvalidData)?,
                total,
            })
        })
        .collect()
}

/// Write phase-one values for a month, resetting the derived metrics to zero
pub(crate) fn upsert_base_aggregate(
    conn: &Connection,
    month: MonthKey,
    totals: &CategoryTotals,
    balance: f64,
) -> Result<UpsertOutcome> {
    let key = month.to_string();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM monthly_aggregates WHERE month_key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                r#"
                UPDATE monthly_aggregates SET
                    housing = ?, dining = ?, living = ?, entertainment = ?, transportation = ?,
                    travel = ?, gifts = ?, transactions = ?, social_expenses = ?, salary = ?,
                    balance = ?, avg_consumption = 0, recent_avg_consumption = 0,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
                params![
                    totals.housing,
                    totals.dining,
                    totals.living,
                    totals.entertainment,
                    totals.transportation,
                    totals.travel,
                    totals.gifts,
                    totals.transactions,
                    totals.social_expenses,
                    totals.salary,
                    balance,
                    id,
                ],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            conn.execute(
                r#"
                INSERT INTO monthly_aggregates (
                    month_key, housing, dining, living, entertainment, transportation,
                    travel, gifts, transactions, social_expenses, salary, balance
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    key,
                    totals.housing,
                    totals.dining,
                    totals.living,
                    totals.entertainment,
                    totals.transportation,
                    totals.travel,
                    totals.gifts,
                    totals.transactions,
                    totals.social_expenses,
                    totals.salary,
                    balance,
                ],
            )?;
            Ok(UpsertOutcome::Created)
        }
    }
}

/// Delete aggregate rows inside `scope` whose month is not in `keep`
pub(crate) fn delete_aggregates_except(
    conn: &Connection,
    scope: RebuildScope,
    keep: &[MonthKey],
) -> Result<usize> {
    let stale: Vec<i64> = load_aggregates(conn)?
        .into_iter()
        .filter(|agg| scope.contains(agg.month_key) && !keep.contains(&agg.month_key))
        .map(|agg| agg.id)
        .collect();

    for id in &stale {
        conn.execute("DELETE FROM monthly_aggregates WHERE id = ?", params![id])?;
    }
    Ok(stale.len())
}

fn row_to_aggregate(row: &Row) -> rusqlite::Result<MonthlyAggregate> {
    let month_key: String = row.get(1)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(MonthlyAggregate {
        id: row.get(0)?,
        month_key: month_key.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        totals: CategoryTotals {
            housing: row.get(2)?,
            dining: row.get(3)?,
            living: row.get(4)?,
            entertainment: row.get(5)?,
            transportation: row.get(6)?,
            travel: row.get(7)?,
            gifts: row.get(8)?,
            transactions: row.get(9)?,
            social_expenses: row.get(10)?,
            salary: row.get(11)?,
        },
        balance: row.get(12)?,
        avg_consumption: row.get(13)?,
        recent_avg_consumption: row.get(14)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// All aggregate rows ordered by month key
pub(crate) fn load_aggregates(conn: &Connection) -> Result<Vec<MonthlyAggregate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM monthly_aggregates ORDER BY month_key",
        AGGREGATE_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], row_to_aggregate)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Write phase-two values for one aggregate row
pub(crate) fn update_derived_metrics(
    conn: &Connection,
    id: i64,
    avg_consumption: f64,
    recent_avg_consumption: f64,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE monthly_aggregates SET
            avg_consumption = ?,
            recent_avg_consumption = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
        params![avg_consumption, recent_avg_consumption, id],
    )?;
    Ok(())
}

/// Open a journal entry for a rebuild; committed before the job starts
pub(crate) fn start_rebuild_run(conn: &Connection, scope: RebuildScope) -> Result<i64> {
    conn.execute(
        "INSERT INTO rebuild_runs (scope, phase, status) VALUES (?, 'pending', 'running')",
        params![scope.to_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn set_rebuild_phase(conn: &Connection, run_id: i64, phase: &str) -> Result<()> {
    conn.execute(
        "UPDATE rebuild_runs SET phase = ? WHERE id = ?",
        params![phase, run_id],
    )?;
    Ok(())
}

pub(crate) fn finish_rebuild_run(
    conn: &Connection,
    run_id: i64,
    status: RebuildStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE rebuild_runs SET status = ?, error = ?, finished_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
        params![status.as_str(), error, run_id],
    )?;
    Ok(())
}

impl Database {
    /// All monthly aggregates, oldest month first
    pub fn list_monthly_aggregates(&self) -> Result<Vec<MonthlyAggregate>> {
        let conn = self.conn()?;
        load_aggregates(&conn)
    }

    /// A single month's aggregate row
    pub fn get_monthly_aggregate(&self, month: MonthKey) -> Result<Option<MonthlyAggregate>> {
        let conn = self.conn()?;
        let agg = conn
            .query_row(
                &format!(
                    "SELECT {} FROM monthly_aggregates WHERE month_key = ?",
                    AGGREGATE_COLUMNS
                ),
                params![month.to_string()],
                row_to_aggregate,
            )
            .optional()?;
        Ok(agg)
    }

    /// Most recent rebuild journal entries
    pub fn list_rebuild_runs(&self, limit: i64) -> Result<Vec<RebuildRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, scope, phase, status, error, started_at, finished_at
            FROM rebuild_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;

        let runs = stmt
            .query_map(params![limit], |row| {
                let status: String = row.get(3)?;
                let started_at: String = row.get(5)?;
                let finished_at: Option<String> = row.get(6)?;
                Ok(RebuildRun {
                    id: row.get(0)?,
                    scope: row.get(1)?,
                    phase: row.get(2)?,
                    status: status.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?,
                    error: row.get(4)?,
                    started_at: parse_datetime(&started_at),
                    finished_at: finished_at.as_deref().map(parse_datetime),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}
