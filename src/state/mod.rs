//! State module for tracking discovery progress
//!
//! # Components
//!
//! - `LinkStatus`: lifecycle of a discovered PDF link (discovered, validated, accessible, ...)
//! - `ExtractionMethod`: how a link was found
//! - `SessionStatus`: lifecycle of a crawl session and its allowed transitions
//! - `CrawlMode`: shallow, deep or full exploration

mod link_status;
mod mode;
mod session_status;

// Re-export main types
pub use link_status::{ExtractionMethod, LinkStatus};
pub use mode::CrawlMode;
pub use session_status::SessionStatus;
