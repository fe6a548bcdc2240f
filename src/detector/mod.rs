//! CAPTCHA and blocking-page detection
//!
//! The classifier is signature based and conservative: a page is only
//! reported as blocked when a known marker is present. Rate-limit responses
//! (429) are left to the rate governor and never count as a block.

mod evidence;

pub use evidence::write_evidence;

use crate::crawler::FetchResponse;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body phrases that identify challenge or denial pages, lowercase
pub const TEXT_MARKERS: &[&str] = &[
    "captcha",
    "recaptcha",
    "hcaptcha",
    "verify you are human",
    "prove you are not a robot",
    "please complete the security check",
    "access denied",
    "rate limit exceeded",
    "ddos protection",
    "are you human",
    "comprueba que eres humano",
    "verificación de seguridad",
    "completa el desafío",
    "acceso denegado",
    "demasiadas solicitudes",
    "límite de tasa excedido",
];

/// Structural markers of embedded challenges
pub const SELECTOR_MARKERS: &[&str] = &[
    "iframe[src*='recaptcha']",
    "iframe[src*='hcaptcha']",
    ".g-recaptcha",
    ".h-captcha",
    "[data-captcha]",
    "div[class*='captcha']",
    "div[id*='captcha']",
];

/// Title keywords of challenge pages, lowercase
pub const TITLE_KEYWORDS: &[&str] = &["captcha", "security check", "verification"];

/// What to do when a blocking page is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockAction {
    /// Pause the session, resuming automatically or waiting for an operator
    #[default]
    Pause,
    /// Drop the URL and carry on
    Skip,
}

impl BlockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Skip => "skip",
        }
    }
}

/// Kind of signal that triggered a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSignal {
    TextMarker,
    Selector,
    Title,
    Status,
    Header,
}

impl BlockSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextMarker => "text-marker",
            Self::Selector => "selector",
            Self::Title => "title",
            Self::Status => "status",
            Self::Header => "header",
        }
    }
}

impl fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a page was classified as blocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvidence {
    pub signal: BlockSignal,
    /// The marker, selector, header or status that matched
    pub detail: String,
    pub url: String,
    pub status: u16,
}

/// Result of inspecting a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    Clear,
    Blocked(BlockEvidence),
}

/// Classifies fetch responses as clear or blocked
pub struct BlockDetector {
    selectors: Vec<(&'static str, Selector)>,
    title: Option<Selector>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDetector {
    pub fn new() -> Self {
        let selectors = SELECTOR_MARKERS
            .iter()
            .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
            .collect();
        Self {
            selectors,
            title: Selector::parse("title").ok(),
        }
    }

    /// Inspects a response for blocking signatures
    ///
    /// # Checks, in order
    ///
    /// 1. Header signatures (`cf-mitigated`, `cf-chl-bypass`, `server: ddos-guard`,
    ///    `x-amzn-waf-action`)
    /// 2. Status 403, or 503 served by a blocking provider
    /// 3. Text markers in the lowercased page text (English and Spanish)
    /// 4. Structural markers (CAPTCHA iframes and containers)
    /// 5. Title keywords
    pub fn inspect(&self, response: &FetchResponse) -> Inspection {
        if response.status == 429 {
            return Inspection::Clear;
        }

        let blocked = |signal: BlockSignal, detail: String| {
            Inspection::Blocked(BlockEvidence {
                signal,
                detail,
                url: response.final_url.clone(),
                status: response.status,
            })
        };

        if let Some(header) = blocking_header(response) {
            return blocked(BlockSignal::Header, header);
        }

        if response.status == 403 {
            return blocked(BlockSignal::Status, "403".to_string());
        }
        if response.status == 503
            && response
                .header("server")
                .map(|s| s.to_ascii_lowercase().contains("cloudflare"))
                .unwrap_or(false)
        {
            return blocked(BlockSignal::Status, "503 server: cloudflare".to_string());
        }

        if response.body.is_empty() {
            return Inspection::Clear;
        }

        // Markers are matched against text content so attribute values
        // are left to the selector checks
        let document = Html::parse_document(&response.body);
        let text = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if let Some(marker) = TEXT_MARKERS.iter().find(|m| text.contains(*m)) {
            return blocked(BlockSignal::TextMarker, marker.to_string());
        }

        if let Some((selector, _)) = self
            .selectors
            .iter()
            .find(|(_, sel)| document.select(sel).next().is_some())
        {
            return blocked(BlockSignal::Selector, selector.to_string());
        }

        if let Some(title_selector) = &self.title {
            let title = document
                .select(title_selector)
                .next()
                .map(|t| t.text().collect::<String>().to_lowercase())
                .unwrap_or_default();
            if let Some(keyword) = TITLE_KEYWORDS.iter().find(|k| title.contains(*k)) {
                return blocked(BlockSignal::Title, keyword.to_string());
            }
        }

        Inspection::Clear
    }
}

fn blocking_header(response: &FetchResponse) -> Option<String> {
    for name in ["cf-mitigated", "cf-chl-bypass", "x-amzn-waf-action"] {
        if let Some(value) = response.header(name) {
            return Some(format!("{}: {}", name, value));
        }
    }

    response
        .header("server")
        .filter(|s| s.to_ascii_lowercase().contains("ddos-guard"))
        .map(|s| format!("server: {}", s))
}
