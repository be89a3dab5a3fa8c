//! Robots.txt and politeness module
//!
//! This module answers "may this URL be fetched" and "how long to wait
//! between fetches to this domain":
//! - robots.txt is fetched per origin (scheme, host, port) and cached (24h
//!   by default); delays and policies stay keyed by the port-less domain
//! - a failed robots fetch imposes no constraints and is retried after an hour
//! - honeypot, extension and path rules apply whether or not robots is honored
//! - crawl delay is the larger of the domain policy delay and robots `Crawl-delay`

mod cache;
mod fetcher;
mod filter;
mod parser;

pub use cache::CachedRobots;
pub use fetcher::{ReqwestRobotsFetcher, RobotsFetchOutcome, RobotsFetcher};
pub use filter::{CrawlDecision, UrlFilter};
pub use parser::ParsedRobots;

use crate::config::PolitenessConfig;
use crate::policy::{DomainPolicy, DomainPolicyStore};
use crate::url::{extract_domain, origin_key, robots_url};
use crate::WardError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

/// How long an allow-all entry from a failed robots fetch is kept
const FAILED_FETCH_TTL_HOURS: i64 = 1;

/// Domain policy merged with robots-derived constraints
#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    pub domain: String,
    pub policy: DomainPolicy,
    pub robots_delay: Option<f64>,
    /// max(policy delay, robots delay)
    pub crawl_delay_seconds: f64,
}

pub struct RobotsPolicyCache {
    fetcher: Arc<dyn RobotsFetcher>,
    policies: Arc<DomainPolicyStore>,
    filter: UrlFilter,
    agent: String,
    ttl: chrono::Duration,
    fetch_timeout: Duration,
    /// domain -> origin -> robots
    cache: RwLock<HashMap<String, HashMap<String, CachedRobots>>>,
}

impl RobotsPolicyCache {
    /// Creates a cache
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Retrieves robots.txt files
    /// * `policies` - Source of per-domain delays
    /// * `config` - Politeness rules (patterns, TTL, timeout)
    /// * `agent` - Token matched against robots.txt `User-agent` lines
    ///
    /// # Returns
    ///
    /// * `Err(WardError::InvalidPattern)` - A configured regex did not compile
    pub fn new(
        fetcher: Arc<dyn RobotsFetcher>,
        policies: Arc<DomainPolicyStore>,
        config: &PolitenessConfig,
        agent: &str,
    ) -> Result<Self, WardError> {
        Ok(Self {
            fetcher,
            policies,
            filter: UrlFilter::from_config(config)?,
            agent: agent.to_string(),
            ttl: chrono::Duration::hours(config.robots_ttl_hours as i64),
            fetch_timeout: Duration::from_secs(config.robots_timeout_secs),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Full authorization check for `url`
    ///
    /// Honeypot, extension and pattern rules are applied first and never
    /// depend on robots.txt. robots.txt is consulted only when
    /// `respect_robots` is set.
    pub async fn check_url(&self, url: &Url, respect_robots: bool) -> CrawlDecision {
        let decision = self.filter.check(url);
        if !decision.is_allowed() || !respect_robots {
            return decision;
        }

        let robots = self.robots_for(url).await;
        if robots.is_allowed(url.as_str(), &self.agent) {
            CrawlDecision::Allowed
        } else {
            CrawlDecision::RobotsDisallowed
        }
    }

    /// Whether `url` may be crawled with robots.txt honored
    pub async fn can_crawl_url(&self, url: &Url) -> bool {
        self.check_url(url, true).await.is_allowed()
    }

    /// Domain policy for `url` merged with its robots crawl delay
    ///
    /// Fetches robots.txt when it is not cached or has expired.
    pub async fn get_policy_for_url(&self, url: &Url) -> Option<EffectivePolicy> {
        let domain = extract_domain(url)?;
        let robots = self.robots_for(url).await;
        let policy = self.policies.get_policy(&domain);
        let robots_delay = robots.crawl_delay(&self.agent);

        Some(EffectivePolicy {
            crawl_delay_seconds: robots_delay
                .map_or(policy.current_delay_seconds, |d| d.max(policy.current_delay_seconds)),
            domain,
            policy,
            robots_delay,
        })
    }

    /// max(domain policy delay, cached robots crawl delay), in seconds
    pub fn get_crawl_delay(&self, domain: &str) -> f64 {
        let policy_delay = self.policies.get_policy(domain).current_delay_seconds;
        self.cached_robots_delay(domain)
            .map_or(policy_delay, |d| d.max(policy_delay))
    }

    /// Crawl delay from a cached robots.txt, without fetching
    ///
    /// The largest delay wins when several origins of `domain` are cached.
    pub fn cached_robots_delay(&self, domain: &str) -> Option<f64> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(domain)?
            .values()
            .filter_map(|entry| entry.robots.crawl_delay(&self.agent))
            .reduce(f64::max)
    }

    /// Drops the cached robots.txt of every origin on `domain`
    pub fn invalidate(&self, domain: &str) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(domain);
    }

    /// Returns cached robots for the URL's origin, fetching when needed
    ///
    /// Concurrent misses for one origin may fetch twice; the last write wins.
    async fn robots_for(&self, url: &Url) -> ParsedRobots {
        let (Some(domain), Some(origin)) = (extract_domain(url), origin_key(url)) else {
            return ParsedRobots::allow_all();
        };

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            let cached = cache
                .get(&domain)
                .and_then(|origins| origins.get(&origin))
                .filter(|c| !c.is_stale());
            if let Some(cached) = cached {
                return cached.robots.clone();
            }
        }

        let Some(target) = robots_url(url) else {
            return ParsedRobots::allow_all();
        };

        let outcome = match tokio::time::timeout(
            self.fetch_timeout,
            self.fetcher.fetch(&target, self.fetch_timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => RobotsFetchOutcome::Failed("timed out".to_string()),
        };

        let entry = match outcome {
            RobotsFetchOutcome::Body(body) => {
                tracing::debug!("Fetched robots.txt for {}", origin);
                CachedRobots::new(ParsedRobots::from_content(&body), self.ttl)
            }
            RobotsFetchOutcome::Missing => {
                tracing::debug!("No robots.txt for {}", origin);
                CachedRobots::new(ParsedRobots::allow_all(), self.ttl)
            }
            RobotsFetchOutcome::Failed(reason) => {
                tracing::warn!(
                    "Failed to fetch robots.txt for {} ({}), allowing all for now",
                    origin,
                    reason
                );
                CachedRobots::new(
                    ParsedRobots::allow_all(),
                    chrono::Duration::hours(FAILED_FETCH_TTL_HOURS),
                )
            }
        };

        let robots = entry.robots.clone();
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.entry(domain).or_default().insert(origin, entry);
        robots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        outcome: RobotsFetchOutcome,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(outcome: RobotsFetchOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RobotsFetcher for StaticFetcher {
        async fn fetch(&self, _robots_url: &Url, _timeout: Duration) -> RobotsFetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn create_test_cache(fetcher: Arc<StaticFetcher>) -> RobotsPolicyCache {
        let policies = Arc::new(DomainPolicyStore::with_defaults(Arc::new(MemoryStore::new())));
        let config = PolitenessConfig {
            honeypot_patterns: vec![r"(?i).*trap.*".to_string()],
            ..PolitenessConfig::default()
        };
        RobotsPolicyCache::new(fetcher, policies, &config, "WardBot").unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_robots_disallow() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Body(
            "User-agent: *\nDisallow: /admin".to_string(),
        ));
        let cache = create_test_cache(fetcher.clone());

        assert!(cache.can_crawl_url(&url("https://a.com/page")).await);
        assert_eq!(
            cache.check_url(&url("https://a.com/admin/x"), true).await,
            CrawlDecision::RobotsDisallowed
        );
        // Ignoring robots lets it through
        assert!(cache.check_url(&url("https://a.com/admin/x"), false).await.is_allowed());
        // Cached after the first fetch
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_honeypot_beats_robots_allow() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Body(
            "User-agent: *\nAllow: /".to_string(),
        ));
        let cache = create_test_cache(fetcher);

        assert!(!cache.can_crawl_url(&url("https://a.com/bot-trap/1")).await);
        assert!(!cache.check_url(&url("https://a.com/trap"), false).await.is_allowed());
        assert!(cache.can_crawl_url(&url("https://a.com/fine")).await);
    }

    #[tokio::test]
    async fn test_failed_fetch_allows_all() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Failed("refused".to_string()));
        let cache = create_test_cache(fetcher.clone());

        assert!(cache.can_crawl_url(&url("https://a.com/anything")).await);
        assert!(cache.can_crawl_url(&url("https://a.com/other")).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_crawl_delay_is_max_of_policy_and_robots() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Body(
            "User-agent: *\nCrawl-delay: 7".to_string(),
        ));
        let cache = create_test_cache(fetcher);

        // Nothing cached yet: policy delay only
        assert_eq!(cache.get_crawl_delay("a.com"), 2.0);

        let effective = cache
            .get_policy_for_url(&url("https://a.com/x"))
            .await
            .unwrap();
        assert_eq!(effective.robots_delay, Some(7.0));
        assert_eq!(effective.crawl_delay_seconds, 7.0);
        assert_eq!(cache.get_crawl_delay("a.com"), 7.0);
    }

    #[tokio::test]
    async fn test_policy_delay_wins_when_larger() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Body(
            "User-agent: *\nCrawl-delay: 1".to_string(),
        ));
        let cache = create_test_cache(fetcher);
        cache.can_crawl_url(&url("https://a.com/")).await;

        cache
            .policies
            .update_on_failure("a.com", Some(429), crate::policy::DetectionSignal::RateLimited);
        assert_eq!(cache.get_crawl_delay("a.com"), 4.0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Missing);
        let cache = create_test_cache(fetcher.clone());

        cache.can_crawl_url(&url("https://a.com/")).await;
        cache.invalidate("a.com");
        cache.can_crawl_url(&url("https://a.com/")).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_each_origin_gets_its_own_robots() {
        let fetcher = StaticFetcher::new(RobotsFetchOutcome::Body(
            "User-agent: *\nCrawl-delay: 3".to_string(),
        ));
        let cache = create_test_cache(fetcher.clone());

        cache.can_crawl_url(&url("https://a.com/x")).await;
        cache.can_crawl_url(&url("https://a.com:443/y")).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        cache.can_crawl_url(&url("http://a.com:8080/x")).await;
        cache.can_crawl_url(&url("http://a.com/x")).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);

        // Delays stay per domain
        assert_eq!(cache.cached_robots_delay("a.com"), Some(3.0));
        cache.invalidate("a.com");
        assert_eq!(cache.cached_robots_delay("a.com"), None);
    }
}
