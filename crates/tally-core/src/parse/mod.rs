//! Statement parsers
//!
//! Each supported export has its own container quirks:
//! - `alipay` - GBK text with the table fenced between dashed separator lines
//! - `wechat` - UTF-8 text after a dashed banner, and the xlsx variant of the same bill
//! - `generic` - plain CSV with the header on the first row
//!
//! Parsers only locate and decode the table. Column mapping and row filtering happen in
//! [`crate::normalize`].

use std::borrow::Cow;

use csv::{ReaderBuilder, Trim};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::detect::detect_format;
use crate::error::{Error, Result};
use crate::models::{ParseDetails, ParseResult, SourceFormat};
use crate::normalize::normalize;

pub mod alipay;
pub mod generic;
pub mod wechat;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Minimum run of dashes that marks a block separator in platform exports
const SEPARATOR_DASHES: &str = "--------------------";

/// A decoded table: normalized header labels plus string cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Build a table from header + rows, folding header labels and padding short rows
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| normalize_label(h)).collect();
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Read delimited text whose first record is the header
    pub fn from_csv_text(text: &str) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            rows.push(record.iter().map(String::from).collect());
        }

        Ok(Self::new(headers, rows))
    }

    /// Index of the first header matching an alias, in alias order
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.headers.iter().position(|h| h == alias))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A parsed table and the encoding it was decoded with
#[derive(Debug, Clone)]
pub struct Decoded {
    pub table: RawTable,
    pub encoding: &'static str,
}

/// Detect, parse, and normalize a statement
pub fn parse_statement(bytes: &[u8], filename: Option<&str>) -> Result<ParseResult> {
    let format = detect_format(bytes, filename);
    parse_as(bytes, format)
}

/// Parse a statement whose format is already known
pub fn parse_as(bytes: &[u8], format: SourceFormat) -> Result<ParseResult> {
    let decoded = match format {
        SourceFormat::Alipay => alipay::parse(bytes)?,
        SourceFormat::Wechat => wechat::parse_text(bytes)?,
        SourceFormat::WechatXlsx => wechat::parse_xlsx(bytes)?,
        SourceFormat::Standard => generic::parse(bytes)?,
    };

    let raw_rows = decoded.table.len();
    if raw_rows == 0 {
        return Err(Error::Format(format!(
            "{} statement contains no data rows",
            format
        )));
    }

    let rows = normalize(format, &decoded.table)?;
    if rows.is_empty() {
        return Err(Error::Format(format!(
            "None of the {} rows in the {} statement could be normalized; check that the file matches its format",
            raw_rows, format
        )));
    }

    let details = ParseDetails {
        format,
        encoding: decoded.encoding.to_string(),
        raw_rows,
        normalized_rows: rows.len(),
        dropped_rows: raw_rows.saturating_sub(rows.len()),
        file_signature: content_signature(bytes),
    };

    info!(
        "Parsed {} statement: {} rows kept, {} dropped ({})",
        format, details.normalized_rows, details.dropped_rows, details.encoding
    );

    Ok(ParseResult { rows, details })
}

/// SHA-256 of the raw upload
pub fn content_signature(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fold full-width punctuation to half-width and trim, so header variants compare equal
pub fn normalize_label(label: &str) -> String {
    label
        .trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
        .chars()
        .map(|c| match c {
            '（' => '(',
            '）' => ')',
            '／' => '/',
            '：' => ':',
            '，' => ',',
            other => other,
        })
        .collect()
}

/// Strip a UTF-8 byte-order mark, reporting whether one was present
pub(crate) fn strip_bom(bytes: &[u8]) -> (&[u8], bool) {
    match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    }
}

/// Lossy UTF-8 decode with BOM handling
pub(crate) fn decode_utf8_sig(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(strip_bom(bytes).0)
}

/// True for the long dashed lines that fence statement tables
pub(crate) fn is_separator(line: &str) -> bool {
    line.trim().starts_with(SEPARATOR_DASHES)
}
