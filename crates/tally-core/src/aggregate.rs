//! Monthly aggregation engine
//!
//! Rebuilds `monthly_aggregates` from persisted transactions in two phases:
//!
//! 1. **Base aggregation** sums each month's transactions per aggregate column (expense
//!    negative, income positive) and upserts one row per month in scope.
//! 2. **Derived metrics** computes `avg_consumption` for every row using a global housing
//!    average, then `recent_avg_consumption` as a rolling mean over the finished values.
//!
//! The whole job runs in one SQLite transaction and each phase in its own savepoint, so a
//! failure anywhere rolls everything back. A journal row in `rebuild_runs` is committed
//! before the job starts; a row still `running` after a crash is picked up by
//! [`Database::recover_interrupted_rebuilds`].

use std::collections::{BTreeMap, HashMap};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::CategoryMap;
use crate::db::{
    delete_aggregates_except, finish_rebuild_run, load_aggregates, month_totals,
    set_rebuild_phase, start_rebuild_run, update_derived_metrics, upsert_base_aggregate,
    Database, UpsertOutcome,
};
use crate::error::{Error, Result};
use crate::models::{
    CategoryField, CategoryTotals, MonthKey, MonthlyAggregate, RebuildResult, RebuildScope,
    RebuildStatus,
};

/// Where a rebuild job currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Pending,
    BaseAggregation,
    DerivedMetrics,
    Completed,
    Failed,
}

impl RebuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BaseAggregation => "base_aggregation",
            Self::DerivedMetrics => "derived_metrics",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rebuilds monthly aggregates from the transaction store
pub struct AggregationEngine<'a> {
    db: &'a Database,
    categories: &'a CategoryMap,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            categories: CategoryMap::builtin(),
        }
    }

    /// Use a custom category mapping instead of the built-in one
    pub fn with_categories(mut self, categories: &'a CategoryMap) -> Self {
        self.categories = categories;
        self
    }

    /// Run a journaled rebuild in its own transaction
    ///
    /// On failure nothing is written except the journal row, which is marked `failed`.
    pub fn rebuild(&self, scope: RebuildScope) -> Result<RebuildResult> {
        scope.validate()?;
        let mut conn = self.db.conn()?;
        let run_id = start_rebuild_run(&conn, scope)?;
        info!("Starting aggregation rebuild #{} ({})", run_id, scope);

        match self.run_journaled(&mut conn, scope, run_id) {
            Ok(result) => {
                info!(
                    "Aggregation rebuild #{} complete: {} months, {} created, {} updated",
                    run_id, result.processed_months, result.created, result.updated
                );
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Aggregation rebuild #{} failed: {}", run_id, message);
                // The job transaction is already rolled back; record the failure outside it
                let journaled = set_rebuild_phase(&conn, run_id, RebuildPhase::Failed.as_str())
                    .and_then(|_| {
                        finish_rebuild_run(&conn, run_id, RebuildStatus::Failed, Some(&message))
                    });
                if let Err(journal_err) = journaled {
                    warn!("Could not record failed rebuild #{}: {}", run_id, journal_err);
                }
                Err(match e {
                    Error::Aggregation(_) => e,
                    other => Error::Aggregation(other.to_string()),
                })
            }
        }
    }

    fn run_journaled(
        &self,
        conn: &mut Connection,
        scope: RebuildScope,
        run_id: i64,
    ) -> Result<RebuildResult> {
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = self.run_in(&mut tx, scope, Some(run_id))?;
        finish_rebuild_run(&tx, run_id, RebuildStatus::Completed, None)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run both phases inside a caller's transaction
    ///
    /// Used by the importer so that inserted rows and rebuilt aggregates commit together.
    /// Nothing is committed here; the caller decides.
    pub(crate) fn run_in(
        &self,
        tx: &mut rusqlite::Transaction<'_>,
        scope: RebuildScope,
        run_id: Option<i64>,
    ) -> Result<RebuildResult> {
        let mut phase = RebuildPhase::Pending;

        let result = (|| -> Result<RebuildResult> {
            phase = RebuildPhase::BaseAggregation;
            let sp = tx.savepoint()?;
            if let Some(id) = run_id {
                set_rebuild_phase(&sp, id, phase.as_str())?;
            }
            let result = base_aggregation(&sp, self.categories, scope)?;
            sp.commit()?;
            debug!(
                "Base aggregation done: {} months ({} created, {} updated)",
                result.processed_months, result.created, result.updated
            );

            phase = RebuildPhase::DerivedMetrics;
            let sp = tx.savepoint()?;
            if let Some(id) = run_id {
                set_rebuild_phase(&sp, id, phase.as_str())?;
            }
            let rows = derived_metrics(&sp, self.categories.consumption_fields())?;
            sp.commit()?;
            debug!("Derived metrics written for {} months", rows);

            phase = RebuildPhase::Completed;
            if let Some(id) = run_id {
                set_rebuild_phase(&*tx, id, phase.as_str())?;
            }
            Ok(result)
        })();

        result.map_err(|e| Error::Aggregation(format!("{} phase failed: {}", phase, e)))
    }
}

/// Phase one: per-month signed totals for the months in scope
fn base_aggregation(
    conn: &Connection,
    categories: &CategoryMap,
    scope: RebuildScope,
) -> Result<RebuildResult> {
    let mut months: BTreeMap<MonthKey, (CategoryTotals, f64)> = BTreeMap::new();

    for total in month_totals(conn, scope)? {
        let signed = total.direction.signed(total.total);
        let (totals, balance) = months.entry(total.month).or_default();
        *balance += signed;
        match categories.field_for(&total.category) {
            Some(field) => totals.add(field, signed),
            None => debug!(
                "Category '{}' in {} has no aggregate column; counted toward balance only",
                total.category, total.month
            ),
        }
    }

    let mut result = RebuildResult {
        processed_months: months.len(),
        ..Default::default()
    };

    for (month, (totals, balance)) in &months {
        match upsert_base_aggregate(conn, *month, totals, *balance)? {
            UpsertOutcome::Created => result.created += 1,
            UpsertOutcome::Updated => result.updated += 1,
        }
    }

    let keep: Vec<MonthKey> = months.keys().copied().collect();
    let removed = delete_aggregates_except(conn, scope, &keep)?;
    if removed > 0 {
        debug!("Removed {} aggregate rows with no remaining transactions", removed);
    }

    Ok(result)
}

/// Phase two: derived metrics over every aggregate row. Returns the number of rows written.
fn derived_metrics(conn: &Connection, consumption: &[CategoryField]) -> Result<usize> {
    let aggregates = load_aggregates(conn)?;
    let housing_avg = housing_average(&aggregates);

    let averages: Vec<(MonthKey, f64)> = aggregates
        .iter()
        .map(|agg| {
            (
                agg.month_key,
                consumption_total(&agg.totals, consumption) + housing_avg,
            )
        })
        .collect();
    let recent = compute_recent_averages(&averages);

    for ((agg, (_, avg)), recent) in aggregates.iter().zip(&averages).zip(recent) {
        update_derived_metrics(conn, agg.id, *avg, recent)?;
    }

    Ok(aggregates.len())
}

/// Housing expense spread evenly over every aggregated month, zero-housing months included
pub fn housing_average(aggregates: &[MonthlyAggregate]) -> f64 {
    if aggregates.is_empty() {
        return 0.0;
    }
    let total: f64 = aggregates.iter().map(|a| a.totals.housing.abs()).sum();
    total / aggregates.len() as f64
}

/// Sum of absolute values of the consumption columns
pub fn consumption_total(totals: &CategoryTotals, fields: &[CategoryField]) -> f64 {
    fields.iter().map(|f| totals.get(*f).abs()).sum()
}

/// Rolling mean over each month and the two calendar months before it
///
/// `averages` must be ordered by month. Months without an aggregate row are left out of
/// the mean rather than counted as zero.
pub fn compute_recent_averages(averages: &[(MonthKey, f64)]) -> Vec<f64> {
    let by_month: HashMap<MonthKey, f64> = averages.iter().copied().collect();

    averages
        .iter()
        .map(|(month, avg)| {
            let prev = month.prev();
            let window: Vec<f64> = std::iter::once(*avg)
                .chain(by_month.get(&prev).copied())
                .chain(by_month.get(&prev.prev()).copied())
                .collect();
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}
