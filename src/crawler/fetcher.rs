//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the engine, including:
//! - Building HTTP clients (one per proxy)
//! - GET, HEAD and form POST requests with the identity's user agent
//! - Manual redirect handling with loop detection
//! - Error classification into transient and permanent failures

use crate::identity::Identity;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, USER_AGENT};
use reqwest::{redirect::Policy, Client, Method};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum number of redirect hops followed for one request
pub const MAX_REDIRECTS: usize = 10;

/// Errors produced by a fetch
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Too many redirects ({0})")]
    TooManyRedirects(usize),

    #[error("Redirect loop at {0}")]
    RedirectLoop(String),

    #[error("Invalid redirect target: {0}")]
    InvalidRedirect(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request failed: {0}")]
    Other(String),
}

impl FetchError {
    /// Returns true for failures worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_) | Self::Body(_))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            Self::Body(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// HTTP method of a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Head,
    /// Form-encoded POST with the given fields
    Post(Vec<(String, String)>),
}

/// A request handed to a [`Fetcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub method: FetchMethod,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: FetchMethod::Get,
        }
    }

    pub fn head(url: Url) -> Self {
        Self {
            url,
            method: FetchMethod::Head,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            url,
            method: FetchMethod::Post(fields),
        }
    }
}

/// A response after redirects have been followed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
    pub final_url: String,
    pub redirect_count: usize,
}

impl FetchResponse {
    /// Gets a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn content_length(&self) -> Option<i64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Performs HTTP retrieval on behalf of an identity
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        identity: &Identity,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError>;
}

/// `reqwest`-backed fetcher
///
/// Redirects are followed manually so the hop count and loops are visible.
/// One client is kept per proxy to reuse connections.
#[derive(Default)]
pub struct HttpFetcher {
    clients: Mutex<HashMap<Option<String>, Client>>,
}

/// Builds an HTTP client for an optional proxy
///
/// # Arguments
///
/// * `proxy` - Proxy URL, or `None` for a direct connection
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(FetchError)` - The proxy URL was rejected or the client failed to build
pub fn build_http_client(proxy: Option<&str>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| FetchError::Client(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| FetchError::Client(e.to_string()))
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, proxy: Option<&String>) -> Result<Client, FetchError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&proxy.cloned()) {
            return Ok(client.clone());
        }
        let client = build_http_client(proxy.map(String::as_str))?;
        clients.insert(proxy.cloned(), client.clone());
        Ok(client)
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// Fetches a URL, following up to [`MAX_REDIRECTS`] redirects
    ///
    /// A 301/302/303 after a POST continues as a GET; HEAD stays HEAD.
    /// Non-2xx statuses are returned as responses, not errors; only transport
    /// failures and broken redirect chains are errors.
    async fn fetch(
        &self,
        request: &FetchRequest,
        identity: &Identity,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(identity.proxy.as_ref())?;
        let mut url = request.url.clone();
        let mut method = request.method.clone();
        let mut visited = HashSet::new();
        visited.insert(url.to_string());
        let mut redirect_count = 0;

        loop {
            let builder = match &method {
                FetchMethod::Get => client.request(Method::GET, url.clone()),
                FetchMethod::Head => client.request(Method::HEAD, url.clone()),
                FetchMethod::Post(fields) => client.post(url.clone()).form(fields),
            };

            let response = builder
                .header(USER_AGENT, identity.user_agent.as_str())
                .timeout(timeout)
                .send()
                .await
                .map_err(FetchError::from_reqwest)?;

            let status = response.status();
            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    let location = location
                        .to_str()
                        .map_err(|e| FetchError::InvalidRedirect(e.to_string()))?;
                    let next = url
                        .join(location)
                        .map_err(|e| FetchError::InvalidRedirect(format!("{}: {}", location, e)))?;

                    redirect_count += 1;
                    if redirect_count > MAX_REDIRECTS {
                        return Err(FetchError::TooManyRedirects(redirect_count));
                    }
                    if !visited.insert(next.to_string()) {
                        return Err(FetchError::RedirectLoop(next.to_string()));
                    }

                    if matches!(status.as_u16(), 301..=303) && matches!(method, FetchMethod::Post(_)) {
                        method = FetchMethod::Get;
                    }
                    tracing::debug!("Redirect {} -> {}", url, next);
                    url = next;
                    continue;
                }
            }

            let headers = collect_headers(response.headers());
            let final_url = response.url().to_string();
            let body = if method == FetchMethod::Head {
                String::new()
            } else {
                response.text().await.map_err(FetchError::from_reqwest)?
            };

            return Ok(FetchResponse {
                status: status.as_u16(),
                headers,
                body,
                final_url,
                redirect_count,
            });
        }
    }
}
