use crate::config::CrawlerConfig;
use crate::crawler::fetcher::{FetchClient, FetchError, FetchRequest, FetchResponse};
use crate::crawler::job::{CrawlJob, CrawlResult};
use crate::crawler::parser::parse_page;
use crate::crawler::scheduler::DomainGate;
use crate::fallback::{FallbackEscalator, FallbackMode, FallbackStrategy};
use crate::metrics::{self, MetricsSink, TracingMetrics};
use crate::policy::{classify_response, DetectionSignal, DomainPolicy, DomainPolicyStore};
use crate::proxy::{ProxyPool, ProxyQuery, ProxyRecord};
use crate::robots::RobotsPolicyCache;
use crate::url::extract_domain;
use crate::WardError;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Results buffered ahead of a slow `crawl_stream` consumer
const STREAM_BUFFER: usize = 64;

/// Client errors that say nothing about blocking and are never retried
fn is_terminal_status(status: u16) -> bool {
    (400..500).contains(&status) && !matches!(status, 403 | 408 | 429)
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Fetches in flight across all domains
    pub max_concurrency: usize,
    /// Fallback attempts per URL after the first fetch
    pub max_url_retries: u32,
    /// Domains backing off longer than this are skipped instead of awaited
    pub max_backoff_wait: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_url_retries: 3,
            max_backoff_wait: Duration::from_secs(120),
        }
    }
}

impl From<&CrawlerConfig> for EngineSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            max_url_retries: config.max_url_retries,
            ..Self::default()
        }
    }
}

enum ResultSink {
    Collect(Vec<CrawlResult>),
    Channel(mpsc::Sender<CrawlResult>),
}

impl ResultSink {
    /// Returns false once nobody is listening
    async fn push(&mut self, result: CrawlResult) -> bool {
        match self {
            Self::Collect(results) => {
                results.push(result);
                true
            }
            Self::Channel(tx) => tx.send(result).await.is_ok(),
        }
    }
}

/// Outcome of processing one frontier entry
struct Processed {
    result: CrawlResult,
    links: Vec<Url>,
}

/// How the fetch that finally succeeded was made
struct SuccessfulAttempt {
    mode: FallbackMode,
    attempts: u32,
    strategy: Option<FallbackStrategy>,
    proxy: Option<ProxyRecord>,
    latency: Duration,
    started: Instant,
}

/// Bounded breadth-first crawler driven by the adaptive policy components
///
/// # Crawl Loop
///
/// 1. Seeds enter the frontier at depth 0 and are marked visited
/// 2. Entries are popped FIFO while the page cap and concurrency cap allow
/// 3. Each URL passes the robots check, then holds the per-domain gate for
///    all of its attempts; bans and backoff are checked once the gate is held
/// 4. Failures are classified, fed to the policy store, and retried through
///    the fallback escalator
/// 5. Links from successful pages join the frontier at depth + 1
///
/// A URL enters the frontier at most once per job, so it is never fetched
/// twice, and the number of results never exceeds `max_pages`.
pub struct CrawlEngine {
    fetcher: Arc<dyn FetchClient>,
    policies: Arc<DomainPolicyStore>,
    robots: Arc<RobotsPolicyCache>,
    escalator: Arc<FallbackEscalator>,
    proxies: Option<Arc<ProxyPool>>,
    metrics: Arc<dyn MetricsSink>,
    settings: EngineSettings,
    gate: DomainGate,
}

impl CrawlEngine {
    pub fn new(
        fetcher: Arc<dyn FetchClient>,
        policies: Arc<DomainPolicyStore>,
        robots: Arc<RobotsPolicyCache>,
        escalator: Arc<FallbackEscalator>,
    ) -> Self {
        Self {
            fetcher,
            policies,
            robots,
            escalator,
            proxies: None,
            metrics: Arc::new(TracingMetrics),
            settings: EngineSettings::default(),
            gate: DomainGate::new(),
        }
    }

    /// Routes fetches through proxies from `pool`
    pub fn with_proxies(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxies = Some(pool);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn policies(&self) -> &Arc<DomainPolicyStore> {
        &self.policies
    }

    pub fn escalator(&self) -> &Arc<FallbackEscalator> {
        &self.escalator
    }

    /// Runs `job` to completion and returns its results in completion order
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<CrawlResult>)` - At most `job.max_pages` results
    /// * `Err(WardError::InvalidJob)` - The job was rejected before any fetch
    pub async fn crawl(&self, job: &CrawlJob) -> Result<Vec<CrawlResult>, WardError> {
        let seeds = job.validate()?;
        let mut sink = ResultSink::Collect(Vec::new());
        self.run(job, seeds, &mut sink).await;
        match sink {
            ResultSink::Collect(results) => Ok(results),
            ResultSink::Channel(_) => Ok(Vec::new()),
        }
    }

    /// Runs `job` on a background task, yielding results as they complete
    ///
    /// Dropping the receiver stops the crawl. Must be called from within a
    /// tokio runtime.
    pub fn crawl_stream(
        self: Arc<Self>,
        job: CrawlJob,
    ) -> Result<mpsc::Receiver<CrawlResult>, WardError> {
        let seeds = job.validate()?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut sink = ResultSink::Channel(tx);
            self.run(&job, seeds, &mut sink).await;
        });

        Ok(rx)
    }

    async fn run(&self, job: &CrawlJob, seeds: Vec<Url>, sink: &mut ResultSink) {
        let started = Instant::now();
        let seed_domains: HashSet<String> = seeds.iter().filter_map(extract_domain).collect();

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(Url, u32)> = VecDeque::new();
        for seed in seeds {
            visited.insert(seed.as_str().to_string());
            frontier.push_back((seed, 0));
        }

        tracing::info!(
            "Starting crawl {} with {} seeds (max depth {}, max pages {})",
            job.id,
            frontier.len(),
            job.max_depth,
            job.max_pages
        );

        let mut in_flight = FuturesUnordered::new();
        let mut emitted = 0usize;
        let mut stopped = false;

        loop {
            while !stopped
                && in_flight.len() < self.settings.max_concurrency
                && emitted + in_flight.len() < job.max_pages
            {
                if job.cancellation.is_cancelled() {
                    tracing::info!("Crawl {} cancelled", job.id);
                    stopped = true;
                    break;
                }
                let Some((url, depth)) = frontier.pop_front() else {
                    break;
                };
                if depth > job.max_depth {
                    continue;
                }
                in_flight.push(self.process(job, url, depth));
            }

            self.metrics
                .gauge(metrics::FRONTIER_SIZE, frontier.len() as f64);

            if in_flight.is_empty() {
                break;
            }

            let pending = in_flight.len();
            let processed = tokio::select! {
                biased;
                _ = job.cancellation.cancelled() => {
                    tracing::info!(
                        "Crawl {} cancelled with {} fetches in flight",
                        job.id,
                        pending
                    );
                    break;
                }
                next = in_flight.next() => match next {
                    Some(processed) => processed,
                    None => break,
                },
            };

            let Some(Processed { result, links }) = processed else {
                continue;
            };

            let next_depth = result.depth + 1;
            if next_depth <= job.max_depth {
                for link in links {
                    if !job.scope.allows(&link, &seed_domains) {
                        continue;
                    }
                    if visited.insert(link.as_str().to_string()) {
                        frontier.push_back((link, next_depth));
                    }
                }
            }

            emitted += 1;
            if !sink.push(result).await {
                tracing::info!("Result receiver for crawl {} dropped, stopping", job.id);
                break;
            }
        }

        tracing::info!(
            "Crawl {} finished: {} results, {} URLs seen, {:.1}s",
            job.id,
            emitted,
            visited.len(),
            started.elapsed().as_secs_f64()
        );
    }

    /// Politeness checks followed by the fetch; `None` means skipped
    async fn process(&self, job: &CrawlJob, url: Url, depth: u32) -> Option<Processed> {
        let domain = extract_domain(&url)?;

        let decision = self.robots.check_url(&url, job.respect_robots).await;
        if !decision.is_allowed() {
            tracing::debug!("Skipping {} ({})", url, decision.reason());
            self.metrics.counter(metrics::URLS_SKIPPED, 1);
            return None;
        }

        // Held across retries so a ban or backoff raised by one URL is seen
        // by every other URL of the domain before it fetches
        let _permit = self
            .gate
            .acquire(&domain, || self.spacing(job, &domain))
            .await;

        if !self.wait_for_domain(&url, &domain).await {
            self.metrics.counter(metrics::URLS_SKIPPED, 1);
            return None;
        }

        Some(self.fetch_with_fallback(job, url, depth, &domain).await)
    }

    /// Sleeps out a short policy backoff; false if the domain is banned or
    /// backing off longer than `max_backoff_wait`
    async fn wait_for_domain(&self, url: &Url, domain: &str) -> bool {
        if self.escalator.is_banned(domain) {
            tracing::debug!("Skipping {}: {} is banned", url, domain);
            return false;
        }

        if let Some(remaining) = self.policies.backoff_remaining(domain) {
            if remaining > self.settings.max_backoff_wait {
                tracing::debug!(
                    "Skipping {}: {} backing off for {:?}",
                    url,
                    domain,
                    remaining
                );
                return false;
            }
            tracing::debug!("Waiting {:?} for {} backoff", remaining, domain);
            tokio::time::sleep(remaining).await;
        }
        true
    }

    /// Runs every attempt for `url`; the caller holds the domain gate
    async fn fetch_with_fallback(
        &self,
        job: &CrawlJob,
        url: Url,
        depth: u32,
        domain: &str,
    ) -> Processed {
        let started = Instant::now();
        let policy = self.policies.get_policy(domain);
        let mut mode = self.escalator.starting_mode(domain, policy.transport);
        let mut proxy = self.pick_proxy(&policy, None);
        let mut strategy: Option<FallbackStrategy> = None;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let policy = self.policies.get_policy(domain);
            let request = FetchRequest {
                url: url.clone(),
                mode,
                proxy: proxy.clone(),
                headers: policy.header_family.headers(),
                timeout: strategy.as_ref().map_or(mode.timeout(), |s| s.timeout),
            };

            let (outcome, latency) = self.attempt(request).await;

            let (status, signal, error) = match outcome {
                Ok(response) if response.is_success() => {
                    let attempt = SuccessfulAttempt {
                        mode,
                        attempts,
                        strategy,
                        proxy,
                        latency,
                        started,
                    };
                    return self.on_success(domain, &url, depth, attempt, response);
                }
                Ok(response) => {
                    let signal =
                        classify_response(response.status, &response.headers, &response.body)
                            .unwrap_or(DetectionSignal::HttpError);
                    (Some(response.status), signal, format!("HTTP {}", response.status))
                }
                Err(e) => (None, e.signal(), e.to_string()),
            };

            self.metrics.counter(metrics::DETECTIONS, 1);
            let failed = |error: String| Processed {
                result: CrawlResult {
                    url: url.to_string(),
                    status_code: status,
                    content: None,
                    extracted_links: Vec::new(),
                    depth,
                    success: false,
                    crawl_time: Utc::now(),
                    mode,
                    attempts,
                    error: Some(error),
                    elapsed: started.elapsed(),
                },
                links: Vec::new(),
            };

            if let Some(status) = status.filter(|s| is_terminal_status(*s)) {
                tracing::debug!("{} returned {}, not retrying", url, status);
                if let Some(proxy) = &proxy {
                    self.report_proxy(proxy, true, signal);
                }
                self.metrics.counter(metrics::PAGES_FAILED, 1);
                return failed(error);
            }

            tracing::debug!("Attempt {} for {} failed: {} ({})", attempts, url, signal, error);
            self.policies.update_on_failure(domain, status, signal);
            if let Some(proxy) = &proxy {
                self.report_proxy(proxy, false, signal);
            }
            if let Some(previous) = strategy.take() {
                self.escalator.record_fallback_result(
                    domain,
                    &previous,
                    false,
                    Some(&error),
                    Some(latency),
                );
            }

            let next = if attempts > self.settings.max_url_retries
                || job.cancellation.is_cancelled()
                || !self.escalator.should_attempt_fallback(domain, signal, mode)
            {
                None
            } else {
                self.escalator.get_fallback_strategy(domain, signal, mode)
            };

            let Some(next) = next else {
                tracing::info!(
                    "Giving up on {} after {} attempts ({})",
                    url,
                    attempts,
                    signal
                );
                self.metrics.counter(metrics::PAGES_FAILED, 1);
                return failed(error);
            };

            let wait = next
                .delay
                .max(self.policies.backoff_remaining(domain).unwrap_or_default())
                .max(self.spacing(job, domain));
            if wait > self.settings.max_backoff_wait {
                tracing::info!(
                    "Giving up on {} after {} attempts: {} backing off for {:?}",
                    url,
                    attempts,
                    domain,
                    wait
                );
                self.metrics.counter(metrics::PAGES_FAILED, 1);
                return failed(error);
            }

            self.metrics.counter(metrics::FALLBACK_ATTEMPTS, 1);
            tokio::time::sleep(wait).await;

            if next.rotate_proxy {
                let policy = self.policies.get_policy(domain);
                let current = proxy.as_ref().map(ProxyRecord::key);
                proxy = self.pick_proxy(&policy, current);
            }
            mode = next.next_mode;
            strategy = Some(next);
        }
    }

    /// One fetch bounded by the request timeout
    async fn attempt(&self, request: FetchRequest) -> (Result<FetchResponse, FetchError>, Duration) {
        let timeout = request.timeout;
        let sent = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.fetcher.fetch(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };
        let latency = sent.elapsed();
        self.metrics.timer(metrics::FETCH_LATENCY, latency);
        (outcome, latency)
    }

    fn on_success(
        &self,
        domain: &str,
        url: &Url,
        depth: u32,
        attempt: SuccessfulAttempt,
        response: FetchResponse,
    ) -> Processed {
        let SuccessfulAttempt {
            mode,
            attempts,
            strategy,
            proxy,
            latency,
            started,
        } = attempt;

        self.policies.update_on_success(domain);
        match &strategy {
            Some(strategy) => {
                self.escalator
                    .record_fallback_result(domain, strategy, true, None, Some(latency))
            }
            None => self.escalator.record_success(domain, mode),
        }
        if let Some(proxy) = &proxy {
            if let Some(pool) = &self.proxies {
                pool.report_outcome(&proxy.key(), true);
            }
        }

        let links = if response.is_html() {
            parse_page(&response.body, &response.url).links
        } else {
            Vec::new()
        };

        tracing::debug!(
            "Fetched {} ({}) in {} mode, {} links",
            response.url,
            response.status,
            mode,
            links.len()
        );
        self.metrics.counter(metrics::PAGES_FETCHED, 1);

        Processed {
            result: CrawlResult {
                url: url.to_string(),
                status_code: Some(response.status),
                extracted_links: links.iter().map(|l| l.to_string()).collect(),
                content: Some(response.body),
                depth,
                success: true,
                crawl_time: Utc::now(),
                mode,
                attempts,
                error: None,
                elapsed: started.elapsed(),
            },
            links,
        }
    }

    /// max(job delay, domain crawl delay)
    fn spacing(&self, job: &CrawlJob, domain: &str) -> Duration {
        let seconds = self.robots.get_crawl_delay(domain).max(job.delay_seconds);
        Duration::from_secs_f64(seconds)
    }

    fn pick_proxy(&self, policy: &DomainPolicy, exclude: Option<String>) -> Option<ProxyRecord> {
        let pool = self.proxies.as_ref()?;
        let picked = pool.select(&ProxyQuery {
            class: Some(policy.proxy_class),
            exclude,
            ..ProxyQuery::default()
        });
        if picked.is_none() {
            tracing::debug!("No active proxy available for {}, fetching directly", policy.domain);
        }
        picked
    }

    fn report_proxy(&self, proxy: &ProxyRecord, success: bool, signal: DetectionSignal) {
        let Some(pool) = &self.proxies else {
            return;
        };
        if !success && signal == DetectionSignal::BlockedIp {
            tracing::info!("Proxy {} blocked, taking it out of rotation", proxy.key());
            pool.mark_blocked(&proxy.key());
        } else {
            pool.report_outcome(&proxy.key(), success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolitenessConfig;
    use crate::fallback::FallbackSettings;
    use crate::metrics::InMemoryMetrics;
    use crate::proxy::{ProbeError, ProxyPoolSettings, ProxyProtocol, ProxyProbe, ProxyStatus};
    use crate::robots::{RobotsFetchOutcome, RobotsFetcher};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Reply {
        Page(u16, String),
        Hang,
    }

    /// Serves canned replies; the last reply for a URL repeats
    #[derive(Default)]
    struct ScriptedFetcher {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedFetcher {
        fn page(self, url: &str, body: String) -> Self {
            self.replies(url, vec![Reply::Page(200, body)])
        }

        fn replies(self, url: &str, replies: Vec<Reply>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .insert(url.to_string(), replies.into());
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.url.to_string())
                .collect()
        }

        fn requests(&self) -> Vec<FetchRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FetchClient for ScriptedFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.calls.lock().unwrap().push(request.clone());
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                match replies.get_mut(request.url.as_str()) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };

            let (status, body) = match reply {
                Some(Reply::Page(status, body)) => (status, body),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return Err(FetchError::Other("hung".to_string()));
                }
                None => (404, "not found".to_string()),
            };

            let mut headers = HashMap::new();
            headers.insert("content-type".to_string(), "text/html".to_string());
            Ok(FetchResponse {
                url: request.url,
                status,
                headers,
                body,
            })
        }
    }

    struct NoRobots;

    #[async_trait]
    impl RobotsFetcher for NoRobots {
        async fn fetch(&self, _robots_url: &Url, _timeout: Duration) -> RobotsFetchOutcome {
            RobotsFetchOutcome::Missing
        }
    }

    struct UnusedProbe;

    #[async_trait]
    impl ProxyProbe for UnusedProbe {
        async fn probe(
            &self,
            _proxy: &ProxyRecord,
            _test_url: &str,
            _timeout: Duration,
        ) -> Result<u16, ProbeError> {
            Ok(200)
        }
    }

    fn html(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|l| format!(r#"<a href="{}">link</a>"#, l))
            .collect();
        format!("<html><body>{}</body></html>", anchors)
    }

    fn create_test_engine(
        fetcher: Arc<ScriptedFetcher>,
        fallback: FallbackSettings,
        settings: EngineSettings,
    ) -> (CrawlEngine, Arc<InMemoryMetrics>) {
        let policies = Arc::new(DomainPolicyStore::with_defaults(Arc::new(MemoryStore::new())));
        let robots = Arc::new(
            RobotsPolicyCache::new(
                Arc::new(NoRobots),
                policies.clone(),
                &PolitenessConfig::default(),
                "WardBot",
            )
            .unwrap(),
        );
        let escalator = Arc::new(FallbackEscalator::new(fallback));
        let metrics = Arc::new(InMemoryMetrics::new());
        let engine = CrawlEngine::new(fetcher, policies, robots, escalator)
            .with_metrics(metrics.clone())
            .with_settings(settings);
        (engine, metrics)
    }

    fn default_engine(fetcher: Arc<ScriptedFetcher>) -> (CrawlEngine, Arc<InMemoryMetrics>) {
        create_test_engine(fetcher, FallbackSettings::default(), EngineSettings::default())
    }

    fn job(seeds: &[&str]) -> CrawlJob {
        CrawlJob::new("test", seeds.iter().map(|s| s.to_string()).collect()).with_delay(0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_cap_stops_before_depth_exhausted() {
        let fetcher = Arc::new(ScriptedFetcher::default().page(
            "https://example.com/",
            html(&["/p1", "/p2", "/p3", "/p4", "/p5"]),
        ));
        let (engine, _) = default_engine(fetcher.clone());

        let results = engine
            .crawl(&job(&["https://example.com"]).with_max_depth(1).with_max_pages(3))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].url, "https://example.com/");
        assert_eq!(results[0].depth, 0);
        assert_eq!(results[0].extracted_links.len(), 5);
        assert!(results[1..].iter().all(|r| r.depth == 1));
        assert_eq!(fetcher.fetched().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_depth_cap() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .page("https://example.com/", html(&["/a"]))
                .page("https://example.com/a", html(&["/b"]))
                .page("https://example.com/b", html(&["/c"])),
        );
        let (engine, _) = default_engine(fetcher.clone());

        let results = engine
            .crawl(&job(&["https://example.com/"]).with_max_depth(1))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.depth <= 1 && r.success));
        assert!(!fetcher.fetched().contains(&"https://example.com/b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_url_fetched_once() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .page("https://example.com/", html(&["/a", "/a#top", "/"]))
                .page("https://example.com/a", html(&["/", "/a/"])),
        );
        let (engine, _) = default_engine(fetcher.clone());

        let results = engine
            .crawl(&job(&["https://example.com/", "https://EXAMPLE.com"]).with_max_depth(5))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let mut fetched = fetcher.fetched();
        fetched.sort();
        fetched.dedup();
        assert_eq!(fetched.len(), fetcher.fetched().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_scope_and_honeypot_links_skipped() {
        let fetcher = Arc::new(ScriptedFetcher::default().page(
            "https://example.com/",
            html(&["https://other.com/", "/trap/1", "/ok"]),
        ));
        let (engine, metrics) = default_engine(fetcher.clone());

        let results = engine
            .crawl(&job(&["https://example.com/"]).with_max_depth(1))
            .await
            .unwrap();

        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains(&"https://example.com/ok"));
        assert!(!fetcher.fetched().iter().any(|u| u.contains("trap") || u.contains("other.com")));
        assert_eq!(metrics.counter_value(metrics::URLS_SKIPPED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_escalates_then_succeeds() {
        let fetcher = Arc::new(ScriptedFetcher::default().replies(
            "https://example.com/",
            vec![
                Reply::Page(429, "slow down".to_string()),
                Reply::Page(200, html(&[])),
            ],
        ));
        let (engine, metrics) = default_engine(fetcher.clone());

        let results = engine.crawl(&job(&["https://example.com/"])).await.unwrap();

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.mode, FallbackMode::Browser);

        let modes: Vec<FallbackMode> = fetcher.requests().iter().map(|r| r.mode).collect();
        assert_eq!(modes, vec![FallbackMode::Http, FallbackMode::Browser]);

        // Doubled to 4s by the 429, then relaxed by the success
        let policy = engine.policies().get_policy("example.com");
        assert!((policy.current_delay_seconds - 3.8).abs() < 1e-9);
        assert_eq!(policy.blocked_requests, 1);

        let stats = engine.escalator().get_domain_stats("example.com").unwrap();
        assert_eq!(stats.preferred_mode, Some(FallbackMode::Browser));
        assert_eq!(metrics.counter_value(metrics::FALLBACK_ATTEMPTS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_browser() {
        let fetcher = Arc::new(ScriptedFetcher::default().replies(
            "https://example.com/",
            vec![Reply::Hang, Reply::Page(200, html(&[]))],
        ));
        let (engine, _) = default_engine(fetcher.clone());

        let results = engine.crawl(&job(&["https://example.com/"])).await.unwrap();

        assert!(results[0].success);
        assert_eq!(results[0].mode, FallbackMode::Browser);
        assert_eq!(fetcher.requests()[1].timeout, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_banned_domain_is_skipped() {
        let blocked = Reply::Page(403, "Access denied".to_string());
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .replies("https://blocked.com/a", vec![blocked.clone()])
                .replies("https://blocked.com/b", vec![blocked.clone()])
                .replies("https://blocked.com/c", vec![blocked]),
        );
        let fallback = FallbackSettings {
            max_retries: 2,
            ..FallbackSettings::default()
        };
        let (engine, metrics) =
            create_test_engine(fetcher.clone(), fallback, EngineSettings::default());

        let results = engine
            .crawl(&job(&[
                "https://blocked.com/a",
                "https://blocked.com/b",
                "https://blocked.com/c",
            ]))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].status_code, Some(403));
        assert_eq!(results[0].attempts, 3);
        assert!(engine.escalator().is_banned("blocked.com"));

        // All three seeds start together; only the first to reach the domain
        // is fetched, the others find the ban once they get their turn
        let fetched = fetcher.fetched();
        assert_eq!(fetched.len(), 3);
        assert!(fetched.iter().all(|u| *u == results[0].url));
        assert_eq!(metrics.counter_value(metrics::URLS_SKIPPED), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_out_policy_backoff() {
        let fetcher = Arc::new(ScriptedFetcher::default().replies(
            "https://example.com/",
            vec![
                Reply::Page(429, "slow down".to_string()),
                Reply::Page(200, html(&[])),
            ],
        ));
        let (engine, _) = default_engine(fetcher.clone());

        let start = Instant::now();
        let results = engine.crawl(&job(&["https://example.com/"])).await.unwrap();

        // 429 doubles the delay to 4s and backs off for five times that,
        // longer than the strategy's own jittered delay
        assert!(results[0].success);
        assert_eq!(results[0].attempts, 2);
        assert!(start.elapsed() >= Duration::from_secs(19));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_abandoned_when_backoff_too_long() {
        let fetcher = Arc::new(ScriptedFetcher::default().replies(
            "https://example.com/",
            vec![
                Reply::Page(429, "slow down".to_string()),
                Reply::Page(200, html(&[])),
            ],
        ));
        let settings = EngineSettings {
            max_backoff_wait: Duration::from_secs(10),
            ..EngineSettings::default()
        };
        let (engine, metrics) =
            create_test_engine(fetcher.clone(), FallbackSettings::default(), settings);

        let results = engine.crawl(&job(&["https://example.com/"])).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].status_code, Some(429));
        assert_eq!(results[0].attempts, 1);
        assert_eq!(fetcher.fetched().len(), 1);
        assert_eq!(metrics.counter_value(metrics::PAGES_FAILED), 1);
        assert_eq!(metrics.counter_value(metrics::FALLBACK_ATTEMPTS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().page("https://example.com/", html(&["/missing"])),
        );
        let (engine, _) = default_engine(fetcher.clone());

        let results = engine
            .crawl(&job(&["https://example.com/"]).with_max_depth(1))
            .await
            .unwrap();

        let missing = results
            .iter()
            .find(|r| r.url == "https://example.com/missing")
            .unwrap();
        assert!(!missing.success);
        assert_eq!(missing.status_code, Some(404));
        assert_eq!(missing.attempts, 1);
        assert_eq!(engine.policies().get_policy("example.com").blocked_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_fetches_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::default().page("https://example.com/", html(&[])));
        let (engine, _) = default_engine(fetcher.clone());

        let job = job(&["https://example.com/"]);
        job.cancellation_token().cancel();
        let results = engine.crawl(&job).await.unwrap();

        assert!(results.is_empty());
        assert!(fetcher.fetched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_job_rejected_before_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let (engine, _) = default_engine(fetcher.clone());

        let err = engine
            .crawl(&job(&["https://example.com/"]).with_max_pages(0))
            .await
            .unwrap_err();
        assert!(matches!(err, WardError::InvalidJob(_)));
        assert!(fetcher.fetched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_stream_yields_results() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().page("https://example.com/", html(&["/a", "/b"])),
        );
        let (engine, _) = default_engine(fetcher);
        let engine = Arc::new(engine);

        let mut rx = engine
            .clone()
            .crawl_stream(job(&["https://example.com/"]).with_max_depth(1))
            .unwrap();

        let mut received = Vec::new();
        while let Some(result) = rx.recv().await {
            received.push(result.url);
        }
        assert_eq!(received.len(), 3);
        assert_eq!(received[0], "https://example.com/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_proxy_is_rotated_out() {
        let fetcher = Arc::new(ScriptedFetcher::default().replies(
            "https://example.com/",
            vec![
                Reply::Page(403, "Access denied".to_string()),
                Reply::Page(200, html(&[])),
            ],
        ));
        let (engine, _) = default_engine(fetcher.clone());

        let pool = Arc::new(ProxyPool::new(
            Arc::new(UnusedProbe),
            ProxyPoolSettings::default(),
        ));
        for host in ["10.0.0.1", "10.0.0.2"] {
            pool.add_proxy(
                ProxyRecord::new(host, 8080, ProxyProtocol::Http).with_status(ProxyStatus::Active),
            );
        }
        let engine = engine.with_proxies(pool.clone());

        let results = engine.crawl(&job(&["https://example.com/"])).await.unwrap();
        assert!(results[0].success);

        let requests = fetcher.requests();
        let first = requests[0].proxy.as_ref().unwrap().key();
        let second = requests[1].proxy.as_ref().unwrap().key();
        assert_ne!(first, second);
        assert_eq!(pool.get(&first).unwrap().status, ProxyStatus::Blocked);
        assert!(pool.get(&second).unwrap().success_rate > 0.5);
    }
}
