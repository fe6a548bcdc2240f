//! Sitemap walker
//!
//! Reads `sitemapindex` and `urlset` documents, following child sitemaps up
//! to a depth limit. PDF locations become candidates; everything else is
//! a crawl seed.

use crate::config::SitemapConfig;
use crate::crawler::PdfCandidate;
use crate::state::ExtractionMethod;
use crate::strategy::{
    fetch_html, DiscoveryStrategy, StrategyContext, StrategyOutput, StrategyResult, UrlFilter,
};
use crate::url::is_pdf_url;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use url::Url;

/// Confidence of a PDF listed in a sitemap
pub const SITEMAP_CONFIDENCE: f64 = 1.0;

fn loc_regex() -> &'static Regex {
    static LOC: OnceLock<Regex> = OnceLock::new();
    LOC.get_or_init(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").expect("loc pattern is valid"))
}

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// Locations of child sitemaps
    Index(Vec<String>),
    /// Locations of pages and documents
    UrlSet(Vec<String>),
}

/// Parses the `<loc>` entries of a sitemap
///
/// CDATA wrappers and the five predefined XML entities are decoded.
pub fn parse_sitemap(xml: &str) -> SitemapDocument {
    let locs = loc_regex()
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| decode_loc(m.as_str()))
        .filter(|loc| !loc.is_empty())
        .collect();

    if xml.to_ascii_lowercase().contains("<sitemapindex") {
        SitemapDocument::Index(locs)
    } else {
        SitemapDocument::UrlSet(locs)
    }
}

fn decode_loc(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>")
        .trim();
    trimmed
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Walks the site's sitemaps
pub struct SitemapWalker {
    config: SitemapConfig,
    filter: UrlFilter,
}

impl SitemapWalker {
    pub fn new(config: SitemapConfig) -> Self {
        Self {
            config,
            filter: UrlFilter::default(),
        }
    }

    fn roots(&self, ctx: &StrategyContext) -> Vec<Url> {
        if self.config.urls.is_empty() {
            return ctx.resolve("/sitemap.xml").into_iter().collect();
        }
        self.config
            .urls
            .iter()
            .filter_map(|u| match ctx.resolve(u) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!("Skipping sitemap {}: {}", u, e);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl DiscoveryStrategy for SitemapWalker {
    fn name(&self) -> &'static str {
        "sitemap"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        self.filter = UrlFilter::new(&self.config.include, &self.config.exclude)?;
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput> {
        let mut pending: VecDeque<(Url, u32)> =
            self.roots(ctx).into_iter().map(|u| (u, 0)).collect();
        let mut visited = HashSet::new();
        let mut seen = HashSet::new();
        let mut output = StrategyOutput::default();
        let mut fetched = 0usize;
        let mut total_locs = 0usize;

        while let Some((sitemap_url, depth)) = pending.pop_front() {
            if output.seed_urls.len() + output.pdf_links.len() >= self.config.max_urls {
                break;
            }
            if !visited.insert(sitemap_url.to_string()) {
                continue;
            }

            let body = match fetch_html(ctx, &sitemap_url).await {
                Ok(body) => body,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Sitemap {} unavailable: {}", sitemap_url, e);
                    continue;
                }
            };
            fetched += 1;

            match parse_sitemap(&body) {
                SitemapDocument::Index(children) => {
                    if depth >= self.config.max_depth {
                        tracing::debug!(
                            "Not following {} child sitemaps of {} at depth {}",
                            children.len(),
                            sitemap_url,
                            depth
                        );
                        continue;
                    }
                    for child in children {
                        match sitemap_url.join(&child) {
                            Ok(url) => pending.push_back((url, depth + 1)),
                            Err(e) => tracing::debug!("Bad child sitemap {}: {}", child, e),
                        }
                    }
                }
                SitemapDocument::UrlSet(locs) => {
                    total_locs += locs.len();
                    for loc in locs {
                        if output.seed_urls.len() + output.pdf_links.len() >= self.config.max_urls
                        {
                            break;
                        }
                        if !self.filter.allows(&loc) || !seen.insert(loc.clone()) {
                            continue;
                        }
                        match Url::parse(&loc) {
                            Ok(url) if is_pdf_url(&url) => output.pdf_links.push(
                                PdfCandidate::new(
                                    loc,
                                    Some(sitemap_url.to_string()),
                                    ExtractionMethod::Sitemap,
                                    SITEMAP_CONFIDENCE,
                                )
                                .with_meta("strategy", "sitemap"),
                            ),
                            Ok(_) => output.seed_urls.push(loc),
                            Err(e) => tracing::debug!("Bad sitemap location {}: {}", loc, e),
                        }
                    }
                }
            }
        }

        output.metadata = serde_json::json!({
            "sitemaps_fetched": fetched,
            "locations": total_locs,
            "seeds": output.seed_urls.len(),
            "pdfs": output.pdf_links.len(),
        });
        Ok(output)
    }
}
