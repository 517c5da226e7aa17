//! Database access functions, one module per table.
//!
//! Re-exported here so callers can use `crate::db::services::*`.

pub mod history_service;
pub mod target_service;

pub use history_service::*;
pub use target_service::*;
