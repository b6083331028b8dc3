//! Error taxonomy shared by every component.
//!
//! Transient exchange failures are retried by the caller, data-integrity
//! problems are rejected locally, and store/config failures at startup are
//! fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Exchange call failed or returned a non-success status.
    #[error("Exchange request failed: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed snapshot, invalid window, invalid project fields.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Whether retrying the same call can reasonably succeed.
    ///
    /// An undecodable response body is malformed data, not a network failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Fetch(_) => true,
            Error::Http(e) => !e.is_decode(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_are_transient() {
        assert!(Error::Fetch("503".to_string()).is_transient());
        assert!(!Error::InvalidData("empty snapshot".to_string()).is_transient());
        assert!(!Error::Store("poisoned".to_string()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidData("window 0.4h out of range".to_string());
        assert_eq!(err.to_string(), "Invalid data: window 0.4h out of range");
    }
}
