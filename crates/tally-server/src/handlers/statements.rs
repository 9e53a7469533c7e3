//! Parse-stage handlers

use axum::{extract::Multipart, Json};
use serde::Serialize;

use super::read_upload;
use crate::AppError;
use tally_core::models::{CanonicalRow, ParseDetails, SourceFormat};
use tally_core::parse::{parse_as, parse_statement as run_parse};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /api/health - Liveness check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ParseResponse {
    pub details: ParseDetails,
    pub rows: Vec<CanonicalRow>,
    /// Canonical CSV (with BOM), ready for editing and resubmission
    pub csv: String,
}

/// POST /api/statements/parse - Convert an uploaded statement into canonical rows
///
/// Multipart fields: `file` (required), `format` (optional override of detection).
pub async fn parse_statement(multipart: Multipart) -> Result<Json<ParseResponse>, AppError> {
    let upload = read_upload(multipart).await?;

    let result = match upload.field("format").filter(|f| !f.trim().is_empty()) {
        Some(name) => {
            let format: SourceFormat = name
                .parse()
                .map_err(|e: String| AppError::bad_request(&e))?;
            parse_as(&upload.bytes, format)?
        }
        None => run_parse(&upload.bytes, upload.filename.as_deref())?,
    };

    let csv = result.to_canonical_csv()?;
    Ok(Json(ParseResponse {
        details: result.details,
        rows: result.rows,
        csv,
    }))
}
