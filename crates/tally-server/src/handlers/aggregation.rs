//! Aggregation handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{AppError, AppState};
use tally_core::models::{
    AggregationStats, MonthKey, MonthlyAggregate, RebuildResult, RebuildScope,
};
use tally_core::AggregationEngine;

/// Request body for a rebuild; omit both fields for a full rebuild
#[derive(Debug, Default, Deserialize)]
pub struct RebuildRequest {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

/// POST /api/aggregation/rebuild - Recompute monthly aggregates
pub async fn rebuild_aggregates(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RebuildRequest>,
) -> Result<Json<RebuildResult>, AppError> {
    let scope = RebuildScope::from_parts(request.year, request.month)?;

    let result = AggregationEngine::new(&state.db)
        .with_categories(&state.categories)
        .rebuild(scope)?;

    info!(
        scope = %scope,
        processed = result.processed_months,
        "Rebuilt monthly aggregates"
    );
    Ok(Json(result))
}

/// GET /api/aggregation/stats - Store-wide counters
pub async fn aggregation_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AggregationStats>, AppError> {
    Ok(Json(state.db.stats()?))
}

/// GET /api/aggregation/months - All monthly aggregates, oldest first
pub async fn list_months(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonthlyAggregate>>, AppError> {
    Ok(Json(state.db.list_monthly_aggregates()?))
}

/// GET /api/aggregation/months/:month - One monthly aggregate (YYYY-MM)
pub async fn get_month(
    State(state): State<Arc<AppState>>,
    Path(month): Path<String>,
) -> Result<Json<MonthlyAggregate>, AppError> {
    let key: MonthKey = month.parse().map_err(|e: String| AppError::bad_request(&e))?;

    let aggregate = state
        .db
        .get_monthly_aggregate(key)?
        .ok_or_else(|| tally_core::Error::NotFound(format!("No aggregate for {}", key)))?;

    Ok(Json(aggregate))
}
