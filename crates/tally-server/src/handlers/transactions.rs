//! Import and export handlers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{header, Response, StatusCode},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::{parse_flag, read_upload};
use crate::{AppError, AppState};
use tally_core::import::Importer;
use tally_core::models::{ImportResult, ImportRow};

/// POST /api/transactions/import - Import an uploaded canonical CSV
///
/// Multipart fields: `file` (required), `deduplicate` (optional, default true).
pub async fn import_canonical_csv(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ImportResult>, AppError> {
    let upload = read_upload(multipart).await?;
    let deduplicate = parse_flag(upload.field("deduplicate"), "deduplicate", true)?;

    let text = String::from_utf8(upload.bytes)
        .map_err(|_| AppError::bad_request("Canonical CSV must be UTF-8"))?;

    let result = Importer::new(&state.db)
        .deduplicate(deduplicate)
        .with_categories(&state.categories)
        .import_csv(&text)?;

    info!(
        imported = result.imported,
        skipped = result.skipped,
        duplicate = result.duplicate,
        "Imported canonical CSV"
    );
    Ok(Json(result))
}

fn default_true() -> bool {
    true
}

/// Request body for importing edited rows
#[derive(Debug, Deserialize)]
pub struct ImportRowsRequest {
    pub rows: Vec<ImportRow>,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

/// POST /api/transactions/import/rows - Import structured rows
pub async fn import_rows(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRowsRequest>,
) -> Result<Json<ImportResult>, AppError> {
    let result = Importer::new(&state.db)
        .deduplicate(request.deduplicate)
        .with_categories(&state.categories)
        .import_rows(&request.rows)?;

    info!(
        imported = result.imported,
        skipped = result.skipped,
        duplicate = result.duplicate,
        "Imported structured rows"
    );
    Ok(Json(result))
}

/// Query parameters for transaction export
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Start date (YYYY-MM-DD)
    pub from: Option<String>,
    /// End date (YYYY-MM-DD)
    pub to: Option<String>,
}

fn parse_date(value: Option<String>, name: &str) -> Result<Option<NaiveDate>, AppError> {
    value
        .filter(|s| !s.is_empty())
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .map_err(|_| AppError::bad_request(&format!("Invalid '{}' date format (use YYYY-MM-DD)", name)))
}

/// GET /api/transactions/export - Export transactions as canonical CSV
pub async fn export_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportQuery>,
) -> Result<Response<Body>, AppError> {
    let from_date = parse_date(params.from, "from")?;
    let to_date = parse_date(params.to, "to")?;

    let csv = state.db.export_canonical_csv(from_date, to_date)?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"transactions.csv\"",
        )
        .body(Body::from(csv))?;

    Ok(response)
}
