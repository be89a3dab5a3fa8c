use crate::UrlError;
use url::Url;

/// Extracts the policy key for a URL: its lowercase host.
///
/// Ports are ignored so that every origin on one host shares a single
/// adaptive policy and fallback state.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_ward::url::extract_domain;
///
/// let url = Url::parse("https://Blog.Example.com:8443/post").unwrap();
/// assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a URL string and returns its policy key
pub fn domain_from_str(url_str: &str) -> Result<String, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    extract_domain(&url).ok_or(UrlError::MissingDomain)
}

/// `scheme://host:port` for the origin serving `url`, with the scheme's
/// default port filled in
pub fn origin_key(url: &Url) -> Option<String> {
    let host = extract_domain(url)?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Builds the robots.txt URL for the origin serving `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    robots.host_str()?;
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}

/// Checks if a domain matches a scope pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any subdomain at any depth.
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => candidate == pattern,
    }
}
