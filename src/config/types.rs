use crate::detector::BlockAction;
use crate::identity::{RotationCadence, RotationPolicy, UaRotation};
use crate::state::CrawlMode;
use serde::{Deserialize, Serialize};

/// Main configuration structure for a discovery run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub site: SiteConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub blocking: BlockingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

impl Config {
    /// Effective depth limit for the configured mode
    ///
    /// `None` means unbounded (full mode).
    pub fn depth_limit(&self) -> Option<u32> {
        self.crawler.mode.depth_limit(self.crawler.max_depth)
    }

    /// Rotation cadence, falling back to the mode's default
    pub fn rotation_cadence(&self) -> RotationCadence {
        self.identity
            .cadence
            .unwrap_or_else(|| RotationCadence::default_for(self.crawler.mode))
    }

    /// Seeds to start a fresh session from
    ///
    /// When no explicit seeds are configured the site's base URL is used.
    pub fn seed_urls(&self) -> Vec<String> {
        if self.site.seeds.is_empty() {
            vec![self.site.base_url.clone()]
        } else {
            self.site.seeds.clone()
        }
    }
}

/// Crawl loop behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Discovery mode (shallow, deep or full)
    pub mode: CrawlMode,

    /// Maximum BFS depth in deep mode
    pub max_depth: u32,

    /// Number of fetch workers running at once
    pub max_concurrent_fetches: u32,

    /// Timeout for a single HTTP request (seconds)
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient failures and 429s;
    /// 0 fetches each page once
    pub retry_attempts: u32,

    /// Base delay between retries; doubled on every attempt (milliseconds)
    pub retry_backoff_ms: u64,

    /// Stop (as interrupted) after this many pages
    pub max_pages: Option<u64>,

    /// Emit a progress line every N processed pages
    pub progress_interval: u64,

    /// How long in-flight fetches may finish after a stop signal (seconds)
    pub shutdown_grace_seconds: u64,

    /// Cap on internal links taken from one page
    pub max_links_per_page: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            mode: CrawlMode::Deep,
            max_depth: 3,
            max_concurrent_fetches: 4,
            request_timeout_secs: 30,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            max_pages: None,
            progress_interval: 10,
            shutdown_grace_seconds: 10,
            max_links_per_page: 100,
        }
    }
}

/// Target site
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Root of the site; used by strategies that probe well-known paths
    pub base_url: String,

    /// Start pages for the BFS
    #[serde(default)]
    pub seeds: Vec<String>,
}

/// Adaptive rate limiting
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    /// Base rate per endpoint
    pub requests_per_minute: f64,

    /// Token bucket capacity
    pub burst: u32,

    /// Floor for the effective rate (requests per minute)
    pub min_rate: f64,

    /// Fractional recovery toward the base rate per success
    pub recovery_step: f64,

    /// Multiplier applied to the effective rate on transient errors
    pub error_factor: f64,

    /// Backoff after the first rate-limit signal (milliseconds)
    pub base_backoff_ms: u64,

    /// Backoff ceiling (seconds)
    pub max_backoff_secs: u64,

    /// Key buckets by host plus first path segment instead of host only
    pub per_path_class: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30.0,
            burst: 5,
            min_rate: 1.0,
            recovery_step: 0.1,
            error_factor: 0.9,
            base_backoff_ms: 5000,
            max_backoff_secs: 300,
            per_path_class: false,
        }
    }
}

/// Outbound identity (proxy + user agent) selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IdentityConfig {
    pub policy: RotationPolicy,

    /// Per-request or per-session; defaults depend on the crawl mode
    pub cadence: Option<RotationCadence>,

    /// User-agent strings; a built-in pool is used when empty
    pub user_agents: Vec<String>,

    pub ua_rotation: UaRotation,

    /// Proxy URLs (http://host:port, socks5://host:port, ...)
    pub proxies: Vec<String>,

    /// Newline-separated proxy list read on every refresh
    pub proxy_file: Option<String>,

    /// Include a direct (no proxy) identity in the pool
    pub allow_direct: bool,

    /// Identities scoring below this are not selected
    pub min_score: f64,

    /// Identities scoring below this are flagged unhealthy
    pub prune_score: f64,

    pub max_consecutive_failures: u32,

    /// Seconds before an unselectable identity is tried again on probation
    pub probation_seconds: u64,

    /// On exhaustion, wait and refresh the pool instead of failing
    pub wait_on_exhaustion: bool,

    pub refresh_seconds: u64,

    pub exhaustion_retries: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            policy: RotationPolicy::Weighted,
            cadence: None,
            user_agents: Vec::new(),
            ua_rotation: UaRotation::Random,
            proxies: Vec::new(),
            proxy_file: None,
            allow_direct: true,
            min_score: 30.0,
            prune_score: 10.0,
            max_consecutive_failures: 5,
            probation_seconds: 30,
            wait_on_exhaustion: false,
            refresh_seconds: 60,
            exhaustion_retries: 3,
        }
    }
}

/// Reaction to CAPTCHA and blocking pages
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BlockingConfig {
    pub action: BlockAction,

    /// Automatic resume delay after a pause; 0 stops the run for manual intervention
    pub pause_seconds: u64,

    /// Directory for blocked-page snapshots
    pub evidence_dir: Option<String>,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            action: BlockAction::Pause,
            pause_seconds: 300,
            evidence_dir: None,
        }
    }
}

/// Checkpoint cadence
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionConfig {
    pub checkpoint_pages: u64,
    pub checkpoint_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            checkpoint_pages: 100,
            checkpoint_seconds: 300,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// HEAD-check newly discovered links after a completed run
    #[serde(default)]
    pub validate_on_discovery: bool,
}

/// Pre-crawl discovery strategies
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub sitemap: SitemapConfig,
    pub pattern: PatternConfig,
    pub search: SearchConfig,
    pub taxonomy: TaxonomyConfig,
    pub forms: FormConfig,
    pub archive: ArchiveConfig,
}

/// Sitemap walker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SitemapConfig {
    pub enabled: bool,
    /// Sitemap URLs; `<base-url>/sitemap.xml` when empty
    pub urls: Vec<String>,
    pub max_depth: u32,
    pub max_urls: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            urls: Vec::new(),
            max_depth: 3,
            max_urls: 5000,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Numeric gap-filling generator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PatternConfig {
    pub enabled: bool,
    /// Minimum group size before gaps are filled
    pub min_samples: usize,
    pub max_urls: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_samples: 2,
            max_urls: 10000,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Search form explorer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SearchConfig {
    pub enabled: bool,
    /// Endpoint receiving the search form POST
    pub search_url: Option<String>,
    pub jurisdictions: Vec<String>,
    /// Span of quarterly windows, counted back from the current year
    pub history_years: u32,
    pub results_per_page: u32,
    pub max_results: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            search_url: None,
            jurisdictions: vec![
                "CIVIL".to_string(),
                "PENAL".to_string(),
                "CONTENCIOSO".to_string(),
                "SOCIAL".to_string(),
                "MILITAR".to_string(),
            ],
            history_years: 20,
            results_per_page: 50,
            max_results: 50000,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Navigation/taxonomy walker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TaxonomyConfig {
    pub enabled: bool,
    pub selectors: Vec<String>,
    /// Navigation pages followed for the second hop
    pub max_nav_pages: usize,
    pub max_pages: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            selectors: [
                "nav a",
                ".menu a",
                ".sidebar a",
                ".navigation a",
                ".nav-menu a",
                "[role=\"navigation\"] a",
                ".breadcrumb a",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_nav_pages: 20,
            max_pages: 100,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Form prober settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FormConfig {
    pub enabled: bool,
    pub seed_pages: Vec<String>,
    pub form_selector: String,
    pub max_options_per_select: usize,
    pub max_combinations: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seed_pages: Vec::new(),
            form_selector: "form".to_string(),
            max_options_per_select: 5,
            max_combinations: 1000,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Legacy archive path prober settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    /// Path templates containing a `{year}` placeholder
    pub templates: Vec<String>,
    pub start_year: i32,
    /// Defaults to the current year
    pub end_year: Option<i32>,
    pub max_probes: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            templates: [
                "/archivos/{year}",
                "/historico/{year}",
                "/legacy/{year}",
                "/old/{year}",
                "/archive/{year}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            start_year: 2000,
            end_year: None,
            max_probes: 500,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}
