//! Errors shared by the WNP crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the shared config and database helpers
#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable, unparsable or invalid configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),
}
