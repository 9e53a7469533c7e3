//! Tally Core Library
//!
//! Statement ingestion and monthly aggregation for the Tally personal finance tool:
//! - Format detection for payment-platform exports (Alipay, WeChat Pay) and a generic template
//! - Per-format parsers that locate the bill table in noisy exports
//! - Normalization into the canonical 8-field transaction schema
//! - Deduplication-aware import with per-row diagnostics
//! - Two-phase monthly aggregation with amortized and rolling consumption metrics
//! - Encrypted SQLite storage (SQLCipher) with connection pooling

pub mod aggregate;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod export;
pub mod import;
pub mod models;
pub mod normalize;
pub mod parse;

pub use aggregate::{AggregationEngine, RebuildPhase};
pub use config::CategoryMap;
pub use db::Database;
pub use detect::detect_format;
pub use error::{Error, Result};
pub use import::{Importer, RowError};
pub use parse::{parse_as, parse_statement};
