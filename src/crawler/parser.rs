//! Link extraction from fetched HTML
//!
//! Links come from `<a href>` and `<link rel="canonical">`. They are
//! resolved against `<base href>` when present, normalized, and returned
//! in document order without duplicates. A page carrying
//! `<meta name="robots" content="nofollow">` yields no links.

use crate::url::normalize_url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub links: Vec<Url>,
    /// The page asked robots not to follow its links
    pub nofollow: bool,
}

/// Parses `html` served from `page_url`
pub fn parse_page(html: &str, page_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    let title = first_match(&document, "title")
        .map(|text| text.trim().to_string())
        .filter(|t| !t.is_empty());

    let nofollow = meta_nofollow(&document);
    if nofollow {
        return ParsedPage {
            title,
            links: Vec::new(),
            nofollow,
        };
    }

    let base = base_href(&document, page_url).unwrap_or_else(|| page_url.clone());
    ParsedPage {
        title,
        links: collect_links(&document, &base),
        nofollow,
    }
}

/// Links on the page as normalized absolute URL strings
pub fn extract_links(html: &str, page_url: &Url) -> Vec<String> {
    parse_page(html, page_url)
        .links
        .into_iter()
        .map(String::from)
        .collect()
}

fn first_match(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>())
}

fn meta_nofollow(document: &Html) -> bool {
    let Ok(selector) = Selector::parse("meta[name][content]") else {
        return false;
    };
    document.select(&selector).any(|meta| {
        let name = meta.value().attr("name").unwrap_or_default();
        let content = meta.value().attr("content").unwrap_or_default();
        name.eq_ignore_ascii_case("robots")
            && content
                .split(',')
                .any(|d| matches!(d.trim().to_lowercase().as_str(), "nofollow" | "none"))
    })
}

fn base_href(document: &Html, page_url: &Url) -> Option<Url> {
    let selector = Selector::parse("base[href]").ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    page_url.join(href.trim()).ok()
}

fn collect_links(document: &Html, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for query in ["a[href]", "link[rel='canonical'][href]"] {
        let Ok(selector) = Selector::parse(query) else {
            continue;
        };
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve(href, base))
            else {
                continue;
            };
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    }

    links
}

/// Resolves an href to a normalized HTTP(S) URL
fn resolve(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}
