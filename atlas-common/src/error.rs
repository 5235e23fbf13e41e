//! Shared error type
//!
//! Component crates define their own error enums and wrap this one for
//! anything that comes from storage, files or configuration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable config file or a value outside its allowed range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lookup by id or key found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// A value that cannot be parsed or violates a model constraint
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// SQLite reported lock contention; worth retrying
    pub fn is_database_locked(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
