//! URL handling
//!
//! Normalization, deduplication keys, rate-limit endpoint keys and
//! document-type checks shared by the frontier, the extractor and the
//! strategies.

mod domain;
mod normalize;

pub use domain::{endpoint_key, extract_domain, is_non_page_asset, is_pdf_url, same_site};
pub use normalize::{dedup_key, key_for, normalize_url};
