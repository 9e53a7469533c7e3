//! WeChat Pay bill parsers (CSV and xlsx)
//!
//! The CSV export carries a banner of account details, then a dashed line, then the
//! table. The xlsx export lays the same banner out in cells, so the header row has to be
//! located by its labels.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate};
use tracing::debug;

use super::{decode_utf8_sig, is_separator, normalize_label, Decoded, RawTable};
use crate::error::{Error, Result};
use crate::models::TIMESTAMP_FORMAT;

/// Label of the income/expense column
const DIRECTION_LABEL: &str = "收/支";
/// Label of the amount column (after punctuation folding)
const AMOUNT_LABEL: &str = "金额(元)";
/// Marker for summary rows and columns
const TOTAL_MARKER: &str = "合计";

/// Parse a WeChat Pay CSV bill
pub fn parse_text(bytes: &[u8]) -> Result<Decoded> {
    let text = decode_utf8_sig(bytes);

    let mut lines = text.lines();
    if !lines.by_ref().any(is_separator) {
        return Err(Error::Format(
            "WeChat bill has no dashed separator before the transaction table".to_string(),
        ));
    }

    let block: Vec<&str> = lines
        .take_while(|line| !is_separator(line))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if block.is_empty() {
        return Err(Error::Format(
            "WeChat bill has no rows after the separator".to_string(),
        ));
    }

    Ok(Decoded {
        table: RawTable::from_csv_text(&block.join("\n"))?,
        encoding: "utf-8-sig",
    })
}

/// Parse a WeChat Pay xlsx bill (first worksheet)
pub fn parse_xlsx(bytes: &[u8]) -> Result<Decoded> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| Error::Format(format!("Unreadable spreadsheet: {}", e)))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::Format("Spreadsheet has no worksheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| Error::Format(format!("Cannot read worksheet {}: {}", sheet, e)))?;

    let grid: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    debug!("Worksheet {:?}: {} rows", sheet, grid.len());

    Ok(Decoded {
        table: extract_bill_table(grid)?,
        encoding: "binary",
    })
}

/// Locate the header row in a cell grid and cut the table out of it
pub fn extract_bill_table(grid: Vec<Vec<String>>) -> Result<RawTable> {
    let header_idx = grid
        .iter()
        .position(|row| is_header_row(row))
        .ok_or_else(|| {
            Error::Format(format!(
                "No header row with both {} and {} found in spreadsheet",
                DIRECTION_LABEL, AMOUNT_LABEL
            ))
        })?;

    let mut rows = grid.into_iter().skip(header_idx);
    let headers: Vec<String> = rows
        .next()
        .unwrap_or_default()
        .iter()
        .map(|h| normalize_label(h))
        .collect();

    // Columns to keep: drop a "合计" column if the sheet has one
    let keep: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.as_str() != TOTAL_MARKER)
        .map(|(i, _)| i)
        .collect();

    let body: Vec<Vec<String>> = rows
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .filter(|row| {
            !row.first()
                .map(|cell| cell.contains(TOTAL_MARKER))
                .unwrap_or(false)
        })
        .map(|row| {
            keep.iter()
                .map(|&i| row.get(i).map(|c| c.trim().to_string()).unwrap_or_default())
                .collect()
        })
        .collect();

    let headers = keep.iter().map(|&i| headers[i].clone()).collect();
    Ok(RawTable::new(headers, body))
}

fn is_header_row(row: &[String]) -> bool {
    let labels: Vec<String> = row.iter().map(|c| normalize_label(c)).collect();
    labels.iter().any(|l| l == DIRECTION_LABEL) && labels.iter().any(|l| l == AMOUNT_LABEL)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_timestamp(dt.as_f64()).unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Excel serial date (1899-12-30 epoch) to a canonical timestamp string
fn excel_serial_to_timestamp(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (value * 86_400.0).round() as i64;
    let ts = base.checked_add_signed(Duration::seconds(seconds))?;
    Some(ts.format(TIMESTAMP_FORMAT).to_string())
}
