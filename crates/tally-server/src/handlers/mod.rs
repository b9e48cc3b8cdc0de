//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod health;
pub mod imports;

// Re-export all handlers for use in router
pub use accounts::*;
pub use health::*;
pub use imports::*;
