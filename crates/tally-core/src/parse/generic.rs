//! Generic template parser
//!
//! Plain CSV with the header on the first row. Templates saved from spreadsheet tools may
//! be UTF-8 with or without a BOM, or GBK on older Windows setups, so each candidate
//! encoding is tried in turn.

use encoding_rs::GBK;
use tracing::{debug, warn};

use super::{strip_bom, Decoded, RawTable};
use crate::error::{Error, Result};

/// Parse a CSV whose first row is the header
pub fn parse(bytes: &[u8]) -> Result<Decoded> {
    let (body, has_bom) = strip_bom(bytes);

    let mut candidates: Vec<(&'static str, Option<String>)> = Vec::with_capacity(3);
    if has_bom {
        candidates.push(("utf-8-sig", std::str::from_utf8(body).ok().map(String::from)));
    }
    candidates.push(("utf-8", std::str::from_utf8(bytes).ok().map(String::from)));
    candidates.push((
        "gbk",
        GBK.decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned()),
    ));

    for (encoding, text) in candidates {
        let Some(text) = text else {
            debug!("Statement is not valid {}", encoding);
            continue;
        };
        match RawTable::from_csv_text(&text) {
            Ok(table) => {
                if encoding == "gbk" {
                    warn!("Statement decoded with GBK fallback");
                }
                return Ok(Decoded { table, encoding });
            }
            Err(e) => debug!("Statement failed to parse as {}: {}", encoding, e),
        }
    }

    Err(Error::Format(
        "Could not decode statement as UTF-8 or GBK CSV".to_string(),
    ))
}
