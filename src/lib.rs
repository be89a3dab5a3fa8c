//! Sumi-Ward: adaptive crawl-resilience core
//!
//! This crate decides, per target domain, how a page should be fetched
//! (transport mode, proxy class, header family, delay) in response to observed
//! blocking signals. It selects proxies by weighted sampling, enforces
//! politeness (robots.txt, honeypots, page and depth limits) and drives a
//! bounded breadth-first crawl on top of those decisions.

pub mod config;
pub mod crawler;
pub mod fallback;
pub mod metrics;
pub mod output;
pub mod policy;
pub mod proxy;
pub mod robots;
pub mod store;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Ward operations
#[derive(Debug, Error)]
pub enum WardError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid crawl job: {0}")]
    InvalidJob(String),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Fetch error for {url}: {source}")]
    Fetch {
        url: String,
        source: crawler::FetchError,
    },

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Ward operations
pub type Result<T> = std::result::Result<T, WardError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEngine, CrawlJob, CrawlResult, CrawlScope};
pub use fallback::{FallbackEscalator, FallbackMode, FallbackStrategy};
pub use policy::{DetectionSignal, DomainPolicy, DomainPolicyStore, RiskLevel};
pub use proxy::{ProxyPool, ProxyRecord};
pub use robots::RobotsPolicyCache;
pub use url::{extract_domain, normalize_url};
