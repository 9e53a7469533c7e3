//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod aggregation;
pub mod statements;
pub mod transactions;

// Re-export all handlers for use in router
pub use aggregation::*;
pub use statements::*;
pub use transactions::*;

use axum::extract::Multipart;

use crate::{AppError, MAX_UPLOAD_SIZE};

/// Uploaded file plus any text fields sent alongside it
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

impl Upload {
    /// Value of a text field, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read a multipart form with one `file` part, enforcing the upload limit
pub async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut fields = Vec::new();
    let mut total_size: usize = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let filename = field.file_name().map(|s| s.to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|_| AppError::bad_request("Failed to read file data"))?;
            total_size += bytes.len();

            // Check file size limit
            if total_size > MAX_UPLOAD_SIZE {
                return Err(AppError::bad_request(&format!(
                    "File too large. Maximum size is {} MB",
                    MAX_UPLOAD_SIZE / 1024 / 1024
                )));
            }

            file = Some((filename, bytes.to_vec()));
        } else if !name.is_empty() {
            let value = field
                .text()
                .await
                .map_err(|_| AppError::bad_request(&format!("Failed to read {}", name)))?;
            fields.push((name, value));
        }
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    Ok(Upload {
        filename,
        bytes,
        fields,
    })
}

/// Parse a "true"/"false" form or query flag
pub fn parse_flag(value: Option<&str>, name: &str, default: bool) -> Result<bool, AppError> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(AppError::bad_request(&format!("Invalid {}: {}", name, v))),
        },
    }
}
