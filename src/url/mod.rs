//! URL handling for fetch tasks
//!
//! Tasks are keyed by domain for pacing, so every task URL is parsed once at
//! enqueue time and its lowercase host recorded alongside it.

use crate::UrlError;
use url::Url;

/// Parses a task URL, accepting only HTTP(S) URLs with a host
///
/// The fragment is dropped since it never reaches the server.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::parse_task_url;
///
/// let (url, domain) = parse_task_url("https://Example.COM/page#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// assert_eq!(domain, "example.com");
/// ```
pub fn parse_task_url(url_str: &str) -> Result<(Url, String), UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let domain = extract_domain(&url).ok_or(UrlError::MissingDomain)?;
    url.set_fragment(None);

    Ok((url, domain))
}

/// Extracts the lowercase host of a URL
///
/// Returns None for URLs without a host.
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
