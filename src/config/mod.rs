//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use cendoj_discovery::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("discovery.toml")).unwrap();
//! println!("Crawl mode: {}", config.crawler.mode);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ArchiveConfig, BlockingConfig, Config, CrawlerConfig, FormConfig, IdentityConfig,
    OutputConfig, PatternConfig, RateLimitConfig, SearchConfig, SessionConfig, SiteConfig,
    SitemapConfig, StrategiesConfig, TaxonomyConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
