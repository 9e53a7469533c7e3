//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Statement could not be located, decoded, or normalized. Nothing was persisted.
    #[error("Format error: {0}")]
    Format(String),

    /// Rebuild job failed and was rolled back as a whole.
    #[error("Aggregation failed: {0}")]
    Aggregation(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// True for errors caused by the caller's input rather than by storage or the environment
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Format(_) | Error::InvalidData(_) | Error::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
