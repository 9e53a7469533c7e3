//! Domain models for Tally

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Storage and display layout for transaction timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical column labels, in the fixed export order:
/// time, category, amount, direction, payment method, counterparty, item, remark
pub const CANONICAL_HEADERS: [&str; 8] = [
    "交易时间",
    "类型",
    "金额",
    "收支",
    "支付方式",
    "交易对方",
    "商品名称",
    "备注",
];

/// Money flow direction. Amounts are always stored as magnitudes; this carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Income,
    Expense,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Label used in statements and canonical CSV
    pub fn label(&self) -> &'static str {
        match self {
            Self::Income => "收入",
            Self::Expense => "支出",
        }
    }

    /// Apply the aggregate sign convention to a magnitude
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            Self::Income => amount.abs(),
            Self::Expense => -amount.abs(),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "收入" | "income" => Ok(Self::Income),
            "支出" | "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statement source formats recognised by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Alipay CSV export (GBK, dashed block)
    Alipay,
    /// WeChat Pay CSV export
    Wechat,
    /// WeChat Pay spreadsheet export
    WechatXlsx,
    /// Generic template with the header on the first row
    Standard,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alipay => "alipay",
            Self::Wechat => "wechat",
            Self::WechatXlsx => "wechat_xlsx",
            Self::Standard => "standard",
        }
    }

    /// Payment method implied by the source, if any
    pub fn payment_method(&self) -> Option<&'static str> {
        match self {
            Self::Alipay => Some("支付宝"),
            Self::Wechat | Self::WechatXlsx => Some("微信支付"),
            Self::Standard => None,
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alipay" => Ok(Self::Alipay),
            "wechat" | "weixin" => Ok(Self::Wechat),
            "wechat_xlsx" | "xlsx" => Ok(Self::WechatXlsx),
            "standard" | "generic" => Ok(Self::Standard),
            _ => Err(format!("Unknown statement format: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized statement row in the canonical 8-field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub time: NaiveDateTime,
    pub category: String,
    /// Always non-negative
    pub amount: f64,
    pub direction: Direction,
    pub payment_method: String,
    pub counterparty: String,
    pub item: String,
    pub remark: String,
}

impl CanonicalRow {
    /// Field values in canonical column order
    pub fn to_record(&self) -> [String; 8] {
        [
            self.time.format(TIMESTAMP_FORMAT).to_string(),
            self.category.clone(),
            format_amount(self.amount),
            self.direction.label().to_string(),
            self.payment_method.clone(),
            self.counterparty.clone(),
            self.item.clone(),
            self.remark.clone(),
        ]
    }

    /// Convert into the loosely-typed record the importer validates
    pub fn to_import_row(&self) -> ImportRow {
        let [time, category, amount, direction, payment_method, counterparty, item, remark] =
            self.to_record();
        ImportRow {
            time,
            category,
            amount,
            direction,
            payment_method,
            counterparty,
            item,
            remark,
        }
    }
}

/// Render an amount without trailing noise ("25.5", "8000")
pub fn format_amount(amount: f64) -> String {
    format!("{}", amount)
}

/// Diagnostics for one parsed statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseDetails {
    pub format: SourceFormat,
    pub encoding: String,
    pub raw_rows: usize,
    pub normalized_rows: usize,
    pub dropped_rows: usize,
    /// SHA-256 of the uploaded bytes, for spotting resubmitted files
    pub file_signature: String,
}

/// Output of the parse stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub rows: Vec<CanonicalRow>,
    pub details: ParseDetails,
}

impl ParseResult {
    /// Canonical CSV text (UTF-8 with BOM)
    pub fn to_canonical_csv(&self) -> Result<String> {
        crate::export::write_canonical_csv(self.rows.iter().map(CanonicalRow::to_record))
    }
}

/// An unvalidated import record, as read from canonical CSV or submitted as JSON
///
/// Every field is text so that bad values survive into diagnostics unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportRow {
    #[serde(alias = "交易时间")]
    pub time: String,
    #[serde(alias = "类型")]
    pub category: String,
    #[serde(alias = "金额", deserialize_with = "string_or_number")]
    pub amount: String,
    #[serde(alias = "收支")]
    pub direction: String,
    #[serde(alias = "支付方式")]
    pub payment_method: String,
    #[serde(alias = "交易对方")]
    pub counterparty: String,
    #[serde(alias = "商品名称")]
    pub item: String,
    #[serde(alias = "备注")]
    pub remark: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
        Missing(Option<()>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => format_amount(n),
        Raw::Missing(_) => String::new(),
    })
}

/// A skipped or duplicate row, with enough context to fix and resubmit it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDiagnostic {
    /// Line number in a headed file (data row index + 2)
    pub row: usize,
    pub data: ImportRow,
    pub reason: String,
}

/// Outcome of an import batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub duplicate: usize,
    pub skipped_rows: Vec<RowDiagnostic>,
    pub duplicate_rows: Vec<RowDiagnostic>,
    /// Aggregation rebuild that ran with the batch
    pub aggregation: RebuildResult,
}

/// A persisted transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub category: String,
    pub amount: f64,
    pub direction: Direction,
    pub payment_method: Option<String>,
    pub counterparty: Option<String>,
    pub item: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn to_canonical_row(&self) -> CanonicalRow {
        CanonicalRow {
            time: self.timestamp,
            category: self.category.clone(),
            amount: self.amount,
            direction: self.direction,
            payment_method: self.payment_method.clone().unwrap_or_default(),
            counterparty: self.counterparty.clone().unwrap_or_default(),
            item: self.item.clone().unwrap_or_default(),
            remark: self.remark.clone().unwrap_or_default(),
        }
    }
}

/// A validated transaction ready to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub timestamp: NaiveDateTime,
    pub category: String,
    pub amount: f64,
    pub direction: Direction,
    pub payment_method: Option<String>,
    pub counterparty: Option<String>,
    pub item: Option<String>,
    pub remark: Option<String>,
}

/// Calendar month identifier, rendered as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

/// Calendar years a stored `YYYY-MM-DD HH:MM:SS` timestamp can express
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1..=9999;

fn check_year(year: i32) -> Result<i32> {
    if YEAR_RANGE.contains(&year) {
        Ok(year)
    } else {
        Err(Error::InvalidData(format!("Invalid year: {}", year)))
    }
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        check_year(year)?;
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidData(format!("Invalid month: {}", month)));
        }
        Ok(Self { year, month })
    }

    /// The calendar month immediately before this one
    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// First instant of the month and first instant of the following month
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let next = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        (month_start(self.year, self.month), month_start(next.0, next.1))
    }
}

fn month_start(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once(|c| c == '-' || c == '/')
            .ok_or_else(|| format!("Invalid month key: {}", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid month key: {}", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month key: {}", s))?;
        MonthKey::new(year, month).map_err(|e| e.to_string())
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MonthKey {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Aggregate columns that transaction categories roll up into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryField {
    Housing,
    Dining,
    Living,
    Entertainment,
    Transportation,
    Travel,
    Gifts,
    Transactions,
    SocialExpenses,
    Salary,
}

impl CategoryField {
    pub const ALL: [CategoryField; 10] = [
        Self::Housing,
        Self::Dining,
        Self::Living,
        Self::Entertainment,
        Self::Transportation,
        Self::Travel,
        Self::Gifts,
        Self::Transactions,
        Self::SocialExpenses,
        Self::Salary,
    ];

    /// Column name in `monthly_aggregates`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Housing => "housing",
            Self::Dining => "dining",
            Self::Living => "living",
            Self::Entertainment => "entertainment",
            Self::Transportation => "transportation",
            Self::Travel => "travel",
            Self::Gifts => "gifts",
            Self::Transactions => "transactions",
            Self::SocialExpenses => "social_expenses",
            Self::Salary => "salary",
        }
    }

    /// Category label used on statements
    pub fn label(&self) -> &'static str {
        match self {
            Self::Housing => "住房",
            Self::Dining => "餐饮",
            Self::Living => "生活",
            Self::Entertainment => "娱乐",
            Self::Transportation => "交通",
            Self::Travel => "旅行",
            Self::Gifts => "礼物",
            Self::Transactions => "交易",
            Self::SocialExpenses => "人情",
            Self::Salary => "工资",
        }
    }
}

impl std::str::FromStr for CategoryField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s.to_lowercase() || f.label() == s)
            .ok_or_else(|| format!("Unknown aggregate field: {}", s))
    }
}

impl std::fmt::Display for CategoryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signed per-category totals for one month (expense negative, income positive)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub housing: f64,
    pub dining: f64,
    pub living: f64,
    pub entertainment: f64,
    pub transportation: f64,
    pub travel: f64,
    pub gifts: f64,
    pub transactions: f64,
    pub social_expenses: f64,
    pub salary: f64,
}

impl CategoryTotals {
    pub fn get(&self, field: CategoryField) -> f64 {
        match field {
            CategoryField::Housing => self.housing,
            CategoryField::Dining => self.dining,
            CategoryField::Living => self.living,
            CategoryField::Entertainment => self.entertainment,
            CategoryField::Transportation => self.transportation,
            CategoryField::Travel => self.travel,
            CategoryField::Gifts => self.gifts,
            CategoryField::Transactions => self.transactions,
            CategoryField::SocialExpenses => self.social_expenses,
            CategoryField::Salary => self.salary,
        }
    }

    fn slot(&mut self, field: CategoryField) -> &mut f64 {
        match field {
            CategoryField::Housing => &mut self.housing,
            CategoryField::Dining => &mut self.dining,
            CategoryField::Living => &mut self.living,
            CategoryField::Entertainment => &mut self.entertainment,
            CategoryField::Transportation => &mut self.transportation,
            CategoryField::Travel => &mut self.travel,
            CategoryField::Gifts => &mut self.gifts,
            CategoryField::Transactions => &mut self.transactions,
            CategoryField::SocialExpenses => &mut self.social_expenses,
            CategoryField::Salary => &mut self.salary,
        }
    }

    pub fn add(&mut self, field: CategoryField, signed_amount: f64) {
        *self.slot(field) += signed_amount;
    }
}

/// One derived row per calendar month
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub id: i64,
    pub month_key: MonthKey,
    #[serde(flatten)]
    pub totals: CategoryTotals,
    pub balance: f64,
    pub avg_consumption: f64,
    pub recent_avg_consumption: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which months a rebuild touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RebuildScope {
    All,
    Year { year: i32 },
    Month { month: MonthKey },
}

impl RebuildScope {
    /// Build a scope from optional year/month arguments
    pub fn from_parts(year: Option<i32>, month: Option<u32>) -> Result<Self> {
        match (year, month) {
            (None, None) => Ok(Self::All),
            (Some(year), None) => Ok(Self::Year {
                year: check_year(year)?,
            }),
            (Some(year), Some(month)) => Ok(Self::Month {
                month: MonthKey::new(year, month)?,
            }),
            (None, Some(_)) => Err(Error::InvalidData(
                "A month scope also needs a year".to_string(),
            )),
        }
    }

    /// Reject scopes that could not have been built through [`RebuildScope::from_parts`]
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::All => Ok(()),
            Self::Year { year } => check_year(*year).map(|_| ()),
            Self::Month { month } => MonthKey::new(month.year, month.month).map(|_| ()),
        }
    }

    /// Whether a month falls inside this scope
    pub fn contains(&self, key: MonthKey) -> bool {
        match self {
            Self::All => true,
            Self::Year { year } => key.year == *year,
            Self::Month { month } => key == *month,
        }
    }
}

impl std::fmt::Display for RebuildScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Year { year } => write!(f, "{:04}", year),
            Self::Month { month } => write!(f, "{}", month),
        }
    }
}

/// Counts reported by an aggregation rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildResult {
    pub processed_months: usize,
    pub created: usize,
    pub updated: usize,
}

/// Store-wide counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationStats {
    pub transaction_count: i64,
    pub aggregate_count: i64,
    pub earliest_ts: Option<NaiveDateTime>,
    pub latest_ts: Option<NaiveDateTime>,
}

/// Lifecycle of a journaled rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildStatus {
    Running,
    Completed,
    Failed,
}

impl RebuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RebuildStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown rebuild status: {}", s)),
        }
    }
}

/// Journal entry for one rebuild job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildRun {
    pub id: i64,
    pub scope: String,
    pub phase: String,
    pub status: RebuildStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
