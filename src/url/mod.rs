//! URL handling module for Sumi-Ward
//!
//! Normalization keeps the crawler's visited set stable; domain extraction
//! yields the key under which per-domain policy and fallback state live.

mod domain;
mod normalize;

pub use domain::{domain_from_str, extract_domain, matches_wildcard, origin_key, robots_url};
pub use normalize::normalize_url;
