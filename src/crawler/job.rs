use crate::config::CrawlerConfig;
use crate::fallback::FallbackMode;
use crate::url::{extract_domain, matches_wildcard, normalize_url};
use crate::WardError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Which discovered links a job may follow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CrawlScope {
    /// Only the domains of the start URLs
    #[default]
    SameDomain,
    /// Domains matching any of these patterns (`example.com`, `*.example.com`)
    Domains(Vec<String>),
    /// Any HTTP(S) link
    Any,
}

impl CrawlScope {
    /// Whether `url` is in scope for a job seeded on `seed_domains`
    pub fn allows(&self, url: &Url, seed_domains: &HashSet<String>) -> bool {
        let Some(domain) = extract_domain(url) else {
            return false;
        };
        match self {
            Self::SameDomain => seed_domains.contains(&domain),
            Self::Domains(patterns) => patterns.iter().any(|p| matches_wildcard(p, &domain)),
            Self::Any => true,
        }
    }
}

/// A bounded breadth-first crawl request
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: String,
    pub start_urls: Vec<String>,
    pub max_depth: u32,
    pub max_pages: usize,
    pub respect_robots: bool,
    /// Lower bound on per-domain spacing (seconds)
    pub delay_seconds: f64,
    pub scope: CrawlScope,
    pub cancellation: CancellationToken,
}

impl CrawlJob {
    pub fn new(id: impl Into<String>, start_urls: Vec<String>) -> Self {
        Self {
            id: id.into(),
            start_urls,
            max_depth: 2,
            max_pages: 100,
            respect_robots: true,
            delay_seconds: 1.0,
            scope: CrawlScope::SameDomain,
            cancellation: CancellationToken::new(),
        }
    }

    /// Builds a job from the `[crawler]` section
    pub fn from_config(config: &CrawlerConfig) -> Self {
        let scope = if config.allowed_domains.is_empty() {
            CrawlScope::SameDomain
        } else {
            CrawlScope::Domains(config.allowed_domains.clone())
        };

        Self {
            id: format!("job-{}", Utc::now().format("%Y%m%d%H%M%S")),
            start_urls: config.start_urls.clone(),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            respect_robots: config.respect_robots,
            delay_seconds: config.delay_seconds,
            scope,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_delay(mut self, delay_seconds: f64) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    pub fn with_respect_robots(mut self, respect_robots: bool) -> Self {
        self.respect_robots = respect_robots;
        self
    }

    pub fn with_scope(mut self, scope: CrawlScope) -> Self {
        self.scope = scope;
        self
    }

    /// Token that stops the job when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Checks the job and returns its normalized, de-duplicated seeds
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Url>)` - Seeds in their original order
    /// * `Err(WardError::InvalidJob)` - No seeds, a zero page cap, a bad
    ///   delay or an unusable start URL
    pub fn validate(&self) -> Result<Vec<Url>, WardError> {
        if self.start_urls.is_empty() {
            return Err(WardError::InvalidJob(
                "start_urls must contain at least one URL".to_string(),
            ));
        }

        if self.max_pages == 0 {
            return Err(WardError::InvalidJob("max_pages must be >= 1".to_string()));
        }

        if !self.delay_seconds.is_finite() || self.delay_seconds < 0.0 {
            return Err(WardError::InvalidJob(format!(
                "delay_seconds must be a non-negative number, got {}",
                self.delay_seconds
            )));
        }

        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for raw in &self.start_urls {
            let url = normalize_url(raw).map_err(|e| {
                WardError::InvalidJob(format!("invalid start URL '{}': {}", raw, e))
            })?;
            if seen.insert(url.as_str().to_string()) {
                seeds.push(url);
            }
        }

        Ok(seeds)
    }
}

/// Outcome of processing one URL
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub url: String,
    pub status_code: Option<u16>,
    pub content: Option<String>,
    pub extracted_links: Vec<String>,
    pub depth: u32,
    /// True iff the final status was 2xx
    pub success: bool,
    pub crawl_time: DateTime<Utc>,
    /// Mode of the last attempt
    pub mode: FallbackMode,
    /// Fetch attempts made, including the first
    pub attempts: u32,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl CrawlResult {
    pub fn is_success_status(status_code: Option<u16>) -> bool {
        status_code.is_some_and(|s| (200..300).contains(&s))
    }
}
