use crate::UrlError;
use url::Url;

/// Query parameters that only carry campaign tracking and never change the page
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid", "yclid"];

/// Normalizes a URL so that the crawler's visited set treats equivalent
/// spellings of the same page as one entry.
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host
/// 3. Collapse empty path segments and drop a trailing slash (except for root)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters, sort the rest, drop an empty query
///
/// The scheme, port and any `www.` prefix are kept: the URL must stay
/// fetchable exactly as the site published it.
///
/// # Examples
///
/// ```
/// use sumi_ward::url::normalize_url;
///
/// let url = normalize_url("https://EXAMPLE.com/docs/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/docs");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Collapses repeated slashes and strips a trailing slash.
///
/// Dot segments are already resolved by `Url::parse`.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_scheme_and_www() {
        let result = normalize_url("http://www.example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://www.example.com/page");
    }

    #[test]
    fn test_keeps_port() {
        let result = normalize_url("http://127.0.0.1:8080/a/").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/a");
    }

    #[test]
    fn test_keep_root_slash() {
        let result = normalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_tracking_params_removed_and_rest_sorted() {
        let result = normalize_url(
            "https://example.com/page?keep=yes&utm_medium=email&another=value&fbclid=123",
        )
        .unwrap();
        assert_eq!(
            result.as_str(),
            "https://example.com/page?another=value&keep=yes"
        );
    }

    #[test]
    fn test_only_tracking_params_drops_query() {
        let result = normalize_url("https://example.com/page?utm_source=a&gclid=c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_dot_segments_and_slashes() {
        let result = normalize_url("https://example.com///a/../b//./c/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_lowercase_host_only() {
        let result = normalize_url("https://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }
}
