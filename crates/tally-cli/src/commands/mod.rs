//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init) and shared utilities (open_db, load_categories)
//! - `import` - Parse, import and export commands
//! - `rebuild` - Recompute monthly aggregates
//! - `serve` - Web server command
//! - `status` - Stats and monthly aggregate listing

pub mod core;
pub mod import;
pub mod rebuild;
pub mod serve;
pub mod status;

// Re-export command functions for main.rs
pub use core::*;
pub use import::*;
pub use rebuild::*;
pub use serve::*;
pub use status::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
