//! Output module for reporting on the discovery catalog
//!
//! This module handles:
//! - Exporting discovered links in CSV, JSON or plain text
//! - Loading and printing catalog, session and identity statistics

mod export;
pub mod stats;

pub use export::{export_links, ExportFormat};
pub use stats::{
    load_statistics, print_identities, print_sessions, print_statistics, DiscoveryStatistics,
};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Unknown export format: {0}")]
    Format(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
