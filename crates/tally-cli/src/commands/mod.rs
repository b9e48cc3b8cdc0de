//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `accounts` - Account listing and creation
//! - `core` - Init and shared utilities (open_db, load_config, build_pipeline)
//! - `import` - Upload, process, inspect, cancel and purge imports
//! - `rate_limit` - Rate window refresh and inspection
//! - `serve` - Web server command
//! - `status` - Database and configuration status

pub mod accounts;
pub mod core;
pub mod import;
pub mod rate_limit;
pub mod serve;
pub mod status;

// Re-export command functions for main.rs
pub use accounts::*;
pub use core::*;
pub use import::*;
pub use rate_limit::*;
pub use serve::*;
pub use status::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
