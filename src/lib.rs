// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod retry;

// Re-export commonly used types
pub use error::{EngineError, ExchangeError, RejectReason, StoreError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
