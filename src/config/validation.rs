use crate::config::types::{
    Config, CrawlerConfig, IdentityConfig, OutputConfig, RateLimitConfig, SessionConfig,
    SiteConfig, StrategiesConfig,
};
use crate::{ConfigError, ConfigResult};
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_crawler_config(&config.crawler)?;
    validate_site_config(&config.site)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_identity_config(&config.identity)?;
    validate_session_config(&config.session)?;
    validate_output_config(&config.output)?;
    validate_strategies(&config.strategies)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> ConfigResult<()> {
    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 64 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-fetches must be between 1 and 64, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.progress_interval < 1 {
        return Err(ConfigError::Validation(
            "progress-interval must be >= 1".to_string(),
        ));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates the target site
fn validate_site_config(config: &SiteConfig) -> ConfigResult<()> {
    validate_http_url("base-url", &config.base_url)?;
    for seed in &config.seeds {
        validate_http_url("seed", seed)?;
    }
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}

/// Validates rate limiting parameters
fn validate_rate_limit_config(config: &RateLimitConfig) -> ConfigResult<()> {
    if config.requests_per_minute <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "requests-per-minute must be > 0, got {}",
            config.requests_per_minute
        )));
    }

    if config.min_rate <= 0.0 || config.min_rate > config.requests_per_minute {
        return Err(ConfigError::Validation(format!(
            "min-rate must be in (0, requests-per-minute], got {}",
            config.min_rate
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation("burst must be >= 1".to_string()));
    }

    if config.recovery_step <= 0.0 || config.recovery_step > 1.0 {
        return Err(ConfigError::Validation(format!(
            "recovery-step must be in (0, 1], got {}",
            config.recovery_step
        )));
    }

    if config.error_factor <= 0.0 || config.error_factor > 1.0 {
        return Err(ConfigError::Validation(format!(
            "error-factor must be in (0, 1], got {}",
            config.error_factor
        )));
    }

    if config.max_backoff_secs.saturating_mul(1000) < config.base_backoff_ms {
        return Err(ConfigError::Validation(
            "max-backoff-secs must not be shorter than base-backoff-ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates identity pool settings
fn validate_identity_config(config: &IdentityConfig) -> ConfigResult<()> {
    if !(0.0..=100.0).contains(&config.min_score) {
        return Err(ConfigError::Validation(format!(
            "min-score must be between 0 and 100, got {}",
            config.min_score
        )));
    }

    if config.prune_score > config.min_score {
        return Err(ConfigError::Validation(format!(
            "prune-score ({}) must not exceed min-score ({})",
            config.prune_score, config.min_score
        )));
    }

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-failures must be >= 1".to_string(),
        ));
    }

    if !config.allow_direct && config.proxies.is_empty() && config.proxy_file.is_none() {
        return Err(ConfigError::Validation(
            "allow-direct = false requires proxies or a proxy-file".to_string(),
        ));
    }

    for proxy in &config.proxies {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> ConfigResult<()> {
    if config.checkpoint_pages < 1 || config.checkpoint_seconds < 1 {
        return Err(ConfigError::Validation(
            "checkpoint-pages and checkpoint-seconds must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> ConfigResult<()> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates strategy settings, including every filter regex
fn validate_strategies(config: &StrategiesConfig) -> ConfigResult<()> {
    let filter_sets = [
        ("sitemap", &config.sitemap.include, &config.sitemap.exclude),
        ("pattern", &config.pattern.include, &config.pattern.exclude),
        ("search", &config.search.include, &config.search.exclude),
        ("taxonomy", &config.taxonomy.include, &config.taxonomy.exclude),
        ("forms", &config.forms.include, &config.forms.exclude),
        ("archive", &config.archive.include, &config.archive.exclude),
    ];

    for (name, include, exclude) in filter_sets {
        for pattern in include.iter().chain(exclude.iter()) {
            Regex::new(pattern).map_err(|e| {
                ConfigError::InvalidPattern(format!("strategies.{}: '{}': {}", name, pattern, e))
            })?;
        }
    }

    for url in &config.sitemap.urls {
        validate_http_url("sitemap url", url)?;
    }

    if config.search.enabled {
        match &config.search.search_url {
            Some(url) => validate_http_url("search-url", url)?,
            None => {
                return Err(ConfigError::Validation(
                    "strategies.search requires search-url when enabled".to_string(),
                ))
            }
        }
    }

    for page in &config.forms.seed_pages {
        validate_http_url("form seed page", page)?;
    }

    for template in &config.archive.templates {
        if !template.contains("{year}") {
            return Err(ConfigError::Validation(format!(
                "archive template '{}' must contain {{year}}",
                template
            )));
        }
    }

    if let Some(end_year) = config.archive.end_year {
        if end_year < config.archive.start_year {
            return Err(ConfigError::Validation(format!(
                "archive end-year {} is before start-year {}",
                end_year, config.archive.start_year
            )));
        }
    }

    Ok(())
}
