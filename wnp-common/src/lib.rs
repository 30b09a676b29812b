//! # WNP Common Library
//!
//! Shared code for the "What's Now Playing" crates:
//! - Error type
//! - TOML configuration loading and logging setup
//! - SQLite database opening
//! - Event types (`WnpEvent`) and the broadcast `EventBus`
//! - SSE helpers for the overlay server
//! - Timestamp/TTL utilities

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
