//! Navigation/taxonomy walker
//!
//! Collects the section pages linked from the site's navigation menus,
//! then the navigation of those pages, and hands them to the crawl as seeds.

use crate::config::TaxonomyConfig;
use crate::strategy::{
    fetch_html, DiscoveryStrategy, StrategyContext, StrategyOutput, StrategyResult, UrlFilter,
};
use crate::url::same_site;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Walks navigation menus one hop deep
pub struct TaxonomyWalker {
    config: TaxonomyConfig,
    selectors: Vec<Selector>,
    filter: UrlFilter,
}

impl TaxonomyWalker {
    pub fn new(config: TaxonomyConfig) -> Self {
        Self {
            config,
            selectors: Vec::new(),
            filter: UrlFilter::default(),
        }
    }

    /// Same-site navigation links of a page, in document order
    fn nav_links(&self, html: &str, page: &Url, site: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for selector in &self.selectors {
            for element in document.select(selector) {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let Ok(mut url) = page.join(href.trim()) else {
                    continue;
                };
                url.set_fragment(None);
                if !matches!(url.scheme(), "http" | "https") || !same_site(&url, site) {
                    continue;
                }
                if seen.insert(url.to_string()) {
                    links.push(url);
                }
            }
        }

        links
    }
}

#[async_trait]
impl DiscoveryStrategy for TaxonomyWalker {
    fn name(&self) -> &'static str {
        "taxonomy"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        self.filter = UrlFilter::new(&self.config.include, &self.config.exclude)?;
        self.selectors = self
            .config
            .selectors
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(selector) => Some(selector),
                Err(e) => {
                    tracing::warn!("Ignoring navigation selector {:?}: {:?}", s, e);
                    None
                }
            })
            .collect();
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput> {
        let root = ctx.base_url().clone();
        let root_html = fetch_html(ctx, &root).await?;
        let first_hop = self.nav_links(&root_html, &root, &root);

        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        let mut add = |url: &Url, seeds: &mut Vec<String>| {
            let s = url.to_string();
            if seeds.len() < self.config.max_pages && self.filter.allows(&s) && seen.insert(s.clone())
            {
                seeds.push(s);
            }
        };

        for url in &first_hop {
            add(url, &mut seeds);
        }

        let mut visited = 0usize;
        for nav_page in first_hop.iter().take(self.config.max_nav_pages) {
            if seeds.len() >= self.config.max_pages {
                break;
            }
            let html = match fetch_html(ctx, nav_page).await {
                Ok(html) => html,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!("Navigation page {} unavailable: {}", nav_page, e);
                    continue;
                }
            };
            visited += 1;
            for url in self.nav_links(&html, nav_page, &root) {
                add(&url, &mut seeds);
            }
        }

        tracing::info!(
            "Taxonomy walker found {} section pages ({} navigation pages visited)",
            seeds.len(),
            visited
        );
        Ok(StrategyOutput {
            metadata: serde_json::json!({
                "navigation_pages": visited,
                "seeds": seeds.len(),
            }),
            seed_urls: seeds,
            pdf_links: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{context, CannedFetcher};
    use std::sync::Arc;

    const ROOT: &str = r#"
        <html><body>
          <nav>
            <a href="/civil">Civil</a>
            <a href="/penal#top">Penal</a>
            <a href="https://other.example.org/x">External</a>
          </nav>
          <main><a href="/not-navigation">Body link</a></main>
        </body></html>"#;

    const CIVIL: &str = r#"<div class="sidebar"><a href="/civil/2020">2020</a><a href="/penal">Penal</a></div>"#;

    fn fetcher() -> Arc<CannedFetcher> {
        Arc::new(
            CannedFetcher::default()
                .with_page("https://example.com/", 200, ROOT)
                .with_page("https://example.com/civil", 200, CIVIL),
        )
    }

    #[tokio::test]
    async fn test_two_hop_navigation() {
        let ctx = context(fetcher());
        let mut walker = TaxonomyWalker::new(TaxonomyConfig::default());
        walker.initialize(&ctx).await.unwrap();
        let output = walker.discover(&ctx).await.unwrap();

        assert_eq!(
            output.seed_urls,
            vec![
                "https://example.com/civil".to_string(),
                "https://example.com/penal".to_string(),
                "https://example.com/civil/2020".to_string(),
            ]
        );
        assert_eq!(output.metadata["navigation_pages"], 1);
    }

    #[tokio::test]
    async fn test_max_pages_cap() {
        let ctx = context(fetcher());
        let mut walker = TaxonomyWalker::new(TaxonomyConfig {
            max_pages: 1,
            ..Default::default()
        });
        walker.initialize(&ctx).await.unwrap();
        let output = walker.discover(&ctx).await.unwrap();
        assert_eq!(output.seed_urls, vec!["https://example.com/civil".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_root_fails() {
        let ctx = context(Arc::new(CannedFetcher::default()));
        let mut walker = TaxonomyWalker::new(TaxonomyConfig::default());
        walker.initialize(&ctx).await.unwrap();
        assert!(walker.discover(&ctx).await.is_err());
    }
}
