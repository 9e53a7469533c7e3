//! Statement format detection
//!
//! Classifies uploaded bytes into one of the supported [`SourceFormat`]s. Detection never
//! fails: anything unrecognised is treated as the generic template.

use encoding_rs::GB18030;
use tracing::debug;

use crate::models::SourceFormat;
use crate::parse::is_separator;

/// ZIP local file header (xlsx is a zip container)
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// OLE2 compound document header (legacy xls)
const OLE2_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// How much of the file to decode for the keyword scan
const PREVIEW_BYTES: usize = 8 * 1024;

const ALIPAY_KEYWORDS: &[&str] = &["支付宝", "alipay"];
const WECHAT_KEYWORDS: &[&str] = &["微信支付", "weixin", "wechat"];

/// Detect the statement format from raw bytes and an optional upload filename
pub fn detect_format(bytes: &[u8], filename: Option<&str>) -> SourceFormat {
    let name = filename.map(|n| n.trim().to_lowercase()).unwrap_or_default();

    if name.ends_with(".xlsx") || name.ends_with(".xls") {
        debug!("Detected spreadsheet from filename {:?}", name);
        return SourceFormat::WechatXlsx;
    }

    if is_spreadsheet(bytes) {
        debug!("Detected spreadsheet container signature");
        return SourceFormat::WechatXlsx;
    }

    if let Some(format) = keyword_format(&name) {
        debug!("Detected {} from filename {:?}", format, name);
        return format;
    }

    let preview = &bytes[..bytes.len().min(PREVIEW_BYTES)];
    for text in preview_candidates(preview) {
        if let Some(format) = keyword_format(&preamble(&text).to_lowercase()) {
            debug!("Detected {} from content keywords", format);
            return format;
        }
    }

    SourceFormat::Standard
}

/// True when the bytes start with a spreadsheet container signature
pub fn is_spreadsheet(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_SIGNATURE) || bytes.starts_with(OLE2_SIGNATURE)
}

fn keyword_format(text: &str) -> Option<SourceFormat> {
    if text.is_empty() {
        return None;
    }
    if ALIPAY_KEYWORDS.iter().any(|k| text.contains(k)) {
        Some(SourceFormat::Alipay)
    } else if WECHAT_KEYWORDS.iter().any(|k| text.contains(k)) {
        Some(SourceFormat::Wechat)
    } else {
        None
    }
}

/// Banner text above the bill table
///
/// Platform exports put their name in the lines before the dashed separator. Without a
/// separator only the first line counts, so data cells such as a `微信支付` payment method
/// in a plain template are not mistaken for a platform banner.
fn preamble(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    match lines.iter().position(|line| is_separator(line)) {
        Some(end) => lines[..end].join("\n"),
        None => lines.first().map(|l| l.to_string()).unwrap_or_default(),
    }
}

/// Lossy decodings of the preview: UTF-8 first, then GB18030
fn preview_candidates(preview: &[u8]) -> Vec<String> {
    let utf8 = String::from_utf8_lossy(preview).into_owned();
    let (gbk, _, _) = GB18030.decode(preview);
    vec![utf8, gbk.into_owned()]
}
