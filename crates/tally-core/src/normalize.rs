//! Normalization of parsed statement tables into canonical rows
//!
//! Each source format names its columns differently. Every canonical field has an ordered
//! alias list per format and the first alias present in the header wins.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{CanonicalRow, Direction, SourceFormat};
use crate::parse::RawTable;

/// Status text Alipay uses for cancelled trades
const ALIPAY_CLOSED: &str = "交易关闭";

/// Refund marker in WeChat's status column
const WECHAT_REFUND: &str = "已退款";

/// WeChat's placeholder for an empty cell
const WECHAT_PLACEHOLDER: &str = "/";

/// Ordered header aliases for each canonical field.
///
/// Labels are compared after full-width punctuation folding, so `金额（元）` is listed
/// as `金额(元)`.
#[derive(Debug, Clone, Copy)]
pub struct ColumnAliases {
    pub time: &'static [&'static str],
    pub category: &'static [&'static str],
    pub amount: &'static [&'static str],
    pub direction: &'static [&'static str],
    pub payment_method: &'static [&'static str],
    pub counterparty: &'static [&'static str],
    pub item: &'static [&'static str],
    pub remark: &'static [&'static str],
    pub status: &'static [&'static str],
}

pub const ALIPAY_COLUMNS: ColumnAliases = ColumnAliases {
    time: &["交易创建时间", "交易时间"],
    // Alipay's 类型 is the trade channel, not a spending category
    category: &[],
    amount: &["金额(元)", "金额"],
    direction: &["收/支", "收支"],
    payment_method: &[],
    counterparty: &["交易对方"],
    item: &["商品名称", "商品说明"],
    remark: &["备注"],
    status: &["交易状态"],
};

pub const WECHAT_COLUMNS: ColumnAliases = ColumnAliases {
    time: &["交易时间"],
    category: &[],
    amount: &["金额(元)", "金额"],
    direction: &["收/支", "收支"],
    payment_method: &[],
    counterparty: &["交易对方"],
    item: &["商品", "商品名称"],
    remark: &["备注"],
    status: &["当前状态"],
};

pub const STANDARD_COLUMNS: ColumnAliases = ColumnAliases {
    time: &["交易时间", "time", "timestamp"],
    category: &["类型", "category"],
    amount: &["金额", "金额(元)", "amount"],
    direction: &["收支", "收/支", "direction"],
    payment_method: &["支付方式", "payment_method"],
    counterparty: &["交易对方", "counterparty"],
    item: &["商品名称", "商品", "item"],
    remark: &["备注", "remark"],
    status: &[],
};

impl ColumnAliases {
    pub fn for_format(format: SourceFormat) -> &'static ColumnAliases {
        match format {
            SourceFormat::Alipay => &ALIPAY_COLUMNS,
            SourceFormat::Wechat | SourceFormat::WechatXlsx => &WECHAT_COLUMNS,
            SourceFormat::Standard => &STANDARD_COLUMNS,
        }
    }
}

/// Column positions resolved against one table's header
struct Columns {
    time: Option<usize>,
    category: Option<usize>,
    amount: usize,
    direction: usize,
    payment_method: Option<usize>,
    counterparty: Option<usize>,
    item: Option<usize>,
    remark: Option<usize>,
    status: Option<usize>,
}

impl Columns {
    fn resolve(table: &RawTable, aliases: &ColumnAliases, format: SourceFormat) -> Result<Self> {
        let amount = table.column(aliases.amount).ok_or_else(|| {
            Error::Format(format!("{} statement has no amount column", format))
        })?;
        let direction = table.column(aliases.direction).ok_or_else(|| {
            Error::Format(format!("{} statement has no income/expense column", format))
        })?;

        Ok(Self {
            time: table.column(aliases.time),
            category: table.column(aliases.category),
            amount,
            direction,
            payment_method: table.column(aliases.payment_method),
            counterparty: table.column(aliases.counterparty),
            item: table.column(aliases.item),
            remark: table.column(aliases.remark),
            status: table.column(aliases.status),
        })
    }
}

/// Map a parsed table onto canonical rows, dropping rows that fail the keep-filter
pub fn normalize(format: SourceFormat, table: &RawTable) -> Result<Vec<CanonicalRow>> {
    let aliases = ColumnAliases::for_format(format);
    let cols = Columns::resolve(table, aliases, format)?;
    let is_wechat = matches!(format, SourceFormat::Wechat | SourceFormat::WechatXlsx);

    let mut out = Vec::with_capacity(table.len());

    for (idx, row) in table.rows.iter().enumerate() {
        let cell = |col: Option<usize>| cell_value(row, col, is_wechat);

        let Ok(direction) = cell(Some(cols.direction)).parse::<Direction>() else {
            debug!("Row {}: not income/expense, dropped", idx + 1);
            continue;
        };

        let status = cell(cols.status);
        if format == SourceFormat::Alipay && status.contains(ALIPAY_CLOSED) {
            debug!("Row {}: closed trade, dropped", idx + 1);
            continue;
        }

        let Some(time) = parse_timestamp(cell(cols.time)) else {
            debug!("Row {}: unparseable timestamp {:?}", idx + 1, cell(cols.time));
            continue;
        };

        let Some(amount) = parse_amount_magnitude(cell(Some(cols.amount))) else {
            debug!("Row {}: unparseable amount {:?}", idx + 1, cell(Some(cols.amount)));
            continue;
        };

        let mut remark = cell(cols.remark).to_string();
        if is_wechat && status.contains(WECHAT_REFUND) {
            remark = if remark.is_empty() {
                status.to_string()
            } else {
                format!("{} {}", remark, status)
            };
        }

        let payment_method = match format.payment_method() {
            Some(fixed) => fixed.to_string(),
            None => cell(cols.payment_method).to_string(),
        };

        out.push(CanonicalRow {
            time,
            category: cell(cols.category).to_string(),
            amount,
            direction,
            payment_method,
            counterparty: cell(cols.counterparty).to_string(),
            item: cell(cols.item).to_string(),
            remark,
        });
    }

    Ok(out)
}

fn cell_value(row: &[String], col: Option<usize>, is_wechat: bool) -> &str {
    let value = col.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("");
    if is_wechat && value == WECHAT_PLACEHOLDER {
        ""
    } else {
        value
    }
}

/// Best-effort timestamp parsing for statement and import cells
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    const DATETIME_FORMATS: [&str; 7] = [
        "%Y-%m-%d %H:%M:%S",   // 2024-01-15 14:30:00
        "%Y/%m/%d %H:%M:%S",   // 2024/01/15 14:30:00
        "%Y-%m-%d %H:%M",      // 2024-01-15 14:30
        "%Y/%m/%d %H:%M",      // 2024/1/15 14:30
        "%Y-%m-%dT%H:%M:%S",   // 2024-01-15T14:30:00
        "%Y-%m-%dT%H:%M:%S%.f", // 2024-01-15T14:30:00.000
        "%Y-%m-%d %H:%M:%S%.f", // 2024-01-15 14:30:00.000
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_local());
    }

    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Strip currency symbols and separators, then take the magnitude
///
/// `"¥-1,234.50"` becomes `1234.5`. Returns `None` when nothing numeric remains.
pub fn parse_amount_magnitude(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(f64::abs)
}
