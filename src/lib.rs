// Core modules
pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::Error;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Error>;
