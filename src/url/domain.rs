use url::Url;

/// File extensions that are never worth fetching as HTML pages
const NON_PAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".zip", ".rar", ".doc", ".docx", ".xls",
    ".xlsx", ".ppt", ".css", ".js", ".mp3", ".mp4", ".avi",
];

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use cendoj_discovery::url::extract_domain;
///
/// let url = Url::parse("https://WWW.PoderJudicial.es/search").unwrap();
/// assert_eq!(extract_domain(&url), Some("www.poderjudicial.es".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true when both URLs point at the same host and port
pub fn same_site(a: &Url, b: &Url) -> bool {
    extract_domain(a) == extract_domain(b) && a.port_or_known_default() == b.port_or_known_default()
}

/// Computes the rate-limiting key for a URL
///
/// The key is the host (with an explicit port when present). With
/// `per_path_class` the first path segment is appended, so that e.g. the
/// search endpoint and static document paths get separate buckets.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use cendoj_discovery::url::endpoint_key;
///
/// let url = Url::parse("https://example.com/search/contenidos.action").unwrap();
/// assert_eq!(endpoint_key(&url, false), "example.com");
/// assert_eq!(endpoint_key(&url, true), "example.com/search");
/// ```
pub fn endpoint_key(url: &Url, per_path_class: bool) -> String {
    let mut key = extract_domain(url).unwrap_or_default();
    if let Some(port) = url.port() {
        key.push_str(&format!(":{}", port));
    }

    if per_path_class {
        if let Some(first) = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|s| !s.is_empty())
        {
            key.push('/');
            key.push_str(first);
        }
    }

    key
}

/// Returns true when the URL path looks like a PDF document
///
/// The check is case-insensitive and ignores query and fragment.
pub fn is_pdf_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".pdf")
}

/// Returns true when the URL points at a static asset that is not a page
pub fn is_non_page_asset(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    NON_PAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
