//! Numeric pattern generator
//!
//! Document URLs on the target site are often numbered
//! (`.../STS_1234_2015.pdf`). Known PDF URLs are grouped by directory and by
//! the filename with its main number blanked out; the gaps between the
//! smallest and largest number of each group are proposed as candidates.

use crate::config::PatternConfig;
use crate::crawler::PdfCandidate;
use crate::state::ExtractionMethod;
use crate::strategy::{DiscoveryStrategy, StrategyContext, StrategyOutput, StrategyResult, UrlFilter};
use crate::url::is_pdf_url;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use url::Url;

/// Confidence of a generated URL; it has never been seen on the site
pub const PATTERN_CONFIDENCE: f64 = 0.5;

/// Directory, filename prefix and filename suffix around the number
type Skeleton = (String, String, String);

#[derive(Debug, Default)]
struct Group {
    numbers: BTreeSet<u64>,
    width: usize,
}

/// Byte range of the longest digit run, the rightmost one on ties
fn main_number(filename: &str) -> Option<(usize, usize)> {
    let bytes = filename.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let longer_or_equal = best.map(|(s, e)| i - start >= e - s).unwrap_or(true);
        if longer_or_equal {
            best = Some((start, i));
        }
    }
    best
}

fn skeleton_of(url: &Url) -> Option<(Skeleton, u64, usize)> {
    if !is_pdf_url(url) {
        return None;
    }
    let path = url.path();
    let split = path.rfind('/')? + 1;
    let (dir, filename) = path.split_at(split);
    let (start, end) = main_number(filename)?;
    let number = filename[start..end].parse::<u64>().ok()?;

    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.set_path(dir);

    Some((
        (
            base.to_string(),
            filename[..start].to_string(),
            filename[end..].to_string(),
        ),
        number,
        end - start,
    ))
}

/// Proposes the missing members of numbered URL sequences
///
/// # Arguments
///
/// * `known` - URLs already discovered; non-PDF and unparsable ones are ignored
/// * `min_samples` - Minimum group size (never less than 2)
/// * `max_urls` - Cap on the number of proposals
///
/// # Returns
///
/// Proposals ordered by group, then by number. Numbers are zero-padded to
/// the narrowest width observed in the group.
///
/// # Examples
///
/// ```
/// use cendoj_discovery::strategy::generate_gap_urls;
///
/// let known = vec![
///     "https://example.com/docs/doc-001.pdf".to_string(),
///     "https://example.com/docs/doc-003.pdf".to_string(),
///     "https://example.com/docs/doc-005.pdf".to_string(),
/// ];
/// assert_eq!(
///     generate_gap_urls(&known, 2, 10),
///     vec![
///         "https://example.com/docs/doc-002.pdf",
///         "https://example.com/docs/doc-004.pdf",
///     ]
/// );
/// ```
pub fn generate_gap_urls(known: &[String], min_samples: usize, max_urls: usize) -> Vec<String> {
    let mut groups: BTreeMap<Skeleton, Group> = BTreeMap::new();
    for raw in known {
        let Ok(url) = Url::parse(raw) else {
            continue;
        };
        let Some((skeleton, number, width)) = skeleton_of(&url) else {
            continue;
        };
        let group = groups.entry(skeleton).or_default();
        group.width = if group.numbers.is_empty() {
            width
        } else {
            group.width.min(width)
        };
        group.numbers.insert(number);
    }

    let known_set: HashSet<&str> = known.iter().map(String::as_str).collect();
    let mut proposals = Vec::new();

    for ((base, prefix, suffix), group) in &groups {
        if group.numbers.len() < min_samples.max(2) {
            continue;
        }
        let (Some(&low), Some(&high)) = (group.numbers.first(), group.numbers.last()) else {
            continue;
        };

        for n in low..=high {
            if proposals.len() >= max_urls {
                return proposals;
            }
            if group.numbers.contains(&n) {
                continue;
            }
            let url = format!(
                "{}{}{:0width$}{}",
                base,
                prefix,
                n,
                suffix,
                width = group.width
            );
            if !known_set.contains(url.as_str()) {
                proposals.push(url);
            }
        }
    }

    proposals
}

/// Fills gaps in numbered document sequences already in the catalog
pub struct PatternGenerator {
    config: PatternConfig,
    filter: UrlFilter,
}

impl PatternGenerator {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            filter: UrlFilter::default(),
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for PatternGenerator {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        self.filter = UrlFilter::new(&self.config.include, &self.config.exclude)?;
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput> {
        let samples: Vec<String> = ctx
            .known_link_urls()?
            .into_iter()
            .filter(|u| self.filter.allows(u))
            .collect();

        let generated = generate_gap_urls(&samples, self.config.min_samples, self.config.max_urls);
        tracing::info!(
            "Pattern generator proposed {} URLs from {} samples",
            generated.len(),
            samples.len()
        );

        let metadata = serde_json::json!({
            "samples": samples.len(),
            "generated": generated.len(),
        });
        Ok(StrategyOutput {
            seed_urls: Vec::new(),
            pdf_links: generated
                .into_iter()
                .map(|url| {
                    PdfCandidate::new(url, None, ExtractionMethod::PatternMatch, PATTERN_CONFIDENCE)
                        .with_meta("strategy", "pattern")
                })
                .collect(),
            metadata,
        })
    }
}
