//! Cendoj discovery: a resumable PDF-link discovery crawler
//!
//! This crate implements a breadth-first discovery engine that catalogs PDF
//! links published by a judicial-document site. It throttles itself per
//! endpoint, rotates outbound identities, backs off on blocking pages and can
//! resume an interrupted session exactly where it stopped.

pub mod config;
pub mod crawler;
pub mod detector;
pub mod frontier;
pub mod governor;
pub mod identity;
pub mod output;
pub mod session;
pub mod state;
pub mod storage;
pub mod strategy;
pub mod url;

use thiserror::Error;

/// Main error type for discovery operations
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] strategy::StrategyError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{CrawlMode, ExtractionMethod, LinkStatus, SessionStatus};
pub use crate::url::{dedup_key, endpoint_key, is_pdf_url, normalize_url};
