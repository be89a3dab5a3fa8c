//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and drive the real
//! reqwest fetchers through full crawls. Per-domain spacing runs on the
//! wall clock, so each crawl is kept to a handful of pages. Retries wait out
//! the domain's policy backoff, so the 429 test takes about 20 seconds.

use std::sync::Arc;
use sumi_ward::config::{parse_config, Config, PolitenessConfig, UserAgentConfig};
use sumi_ward::crawler::{build_http_client, CrawlEngine, CrawlJob, ReqwestFetchClient};
use sumi_ward::fallback::{FallbackEscalator, FallbackMode, FallbackSettings};
use sumi_ward::policy::{AdaptiveResponder, DetectionSignal, DomainPolicyStore};
use sumi_ward::robots::{ReqwestRobotsFetcher, RobotsPolicyCache};
use sumi_ward::store::open_store;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "WardBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

/// Builds an engine wired to real HTTP clients and an in-memory store
fn create_test_engine() -> CrawlEngine {
    let user_agent = create_test_user_agent();
    let store = open_store(None).unwrap();

    let policies = Arc::new(DomainPolicyStore::new(
        store.clone(),
        AdaptiveResponder::default(),
        std::time::Duration::from_secs(3600),
    ));
    let robots = Arc::new(
        RobotsPolicyCache::new(
            Arc::new(ReqwestRobotsFetcher::new(
                build_http_client(&user_agent).unwrap(),
            )),
            policies.clone(),
            &PolitenessConfig::default(),
            &user_agent.crawler_name,
        )
        .unwrap(),
    );
    let escalator =
        Arc::new(FallbackEscalator::new(FallbackSettings::default()).with_store(store));

    CrawlEngine::new(
        Arc::new(ReqwestFetchClient::new(&user_agent).unwrap()),
        policies,
        robots,
        escalator,
    )
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(format!("<html><body>{}</body></html>", body))
}

#[tokio::test]
async fn test_crawl_follows_links_and_honors_robots() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/public">Public</a><a href="/private">Private</a>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html("<p>Nothing further</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html("<p>Secret</p>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let engine = create_test_engine();
    let job = CrawlJob::new("it-robots", vec![format!("{}/", base_url)])
        .with_max_depth(1)
        .with_delay(0.0);

    let results = engine.crawl(&job).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));

    let root = results.iter().find(|r| r.depth == 0).unwrap();
    assert_eq!(root.status_code, Some(200));
    assert!(root
        .extracted_links
        .contains(&format!("{}/public", base_url)));

    let child = results.iter().find(|r| r.depth == 1).unwrap();
    assert!(child.url.ends_with("/public"));
    assert_eq!(child.mode, FallbackMode::Http);
}

#[tokio::test]
async fn test_rate_limited_page_is_retried_with_escalation() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(html("<p>Finally</p>"))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let engine = create_test_engine();
    let job = CrawlJob::new("it-429", vec![format!("{}/busy", base_url)])
        .with_max_depth(0)
        .with_delay(0.0);

    let results = engine.crawl(&job).await.unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.attempts, 2);
    assert_eq!(result.mode, FallbackMode::Browser);

    let policy = engine.policies().get_policy("127.0.0.1");
    assert!(policy.current_delay_seconds > 2.0);
    assert_eq!(policy.blocked_requests, 1);

    let stats = engine.escalator().get_domain_stats("127.0.0.1").unwrap();
    assert_eq!(stats.preferred_mode, Some(FallbackMode::Browser));
}

#[tokio::test]
async fn test_not_found_is_reported_without_retry() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let engine = create_test_engine();
    let job = CrawlJob::new("it-404", vec![format!("{}/gone", base_url)]).with_max_depth(0);

    let results = engine.crawl(&job).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].status_code, Some(404));
    assert_eq!(results[0].attempts, 1);
    assert_eq!(engine.policies().get_policy("127.0.0.1").blocked_requests, 0);
}

#[tokio::test]
async fn test_crawl_stream_delivers_results() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<p>Leaf</p>"))
        .mount(&mock_server)
        .await;

    let engine = Arc::new(create_test_engine());
    let job = CrawlJob::new("it-stream", vec![format!("{}/", base_url)]);

    let mut rx = engine.crawl_stream(job).unwrap();
    let mut received = Vec::new();
    while let Some(result) = rx.recv().await {
        received.push(result);
    }

    assert_eq!(received.len(), 1);
    assert!(received[0].success);
}

#[test]
fn test_learned_state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("ward.db");

    {
        let store = open_store(Some(&db_path)).unwrap();
        let policies = DomainPolicyStore::with_defaults(store.clone());
        policies.update_on_failure("example.com", Some(429), DetectionSignal::RateLimited);

        let escalator = FallbackEscalator::new(FallbackSettings::default()).with_store(store);
        let strategy = escalator
            .get_fallback_strategy("example.com", DetectionSignal::RateLimited, FallbackMode::Http)
            .unwrap();
        assert_eq!(strategy.next_mode, FallbackMode::Browser);
        escalator.record_fallback_result("example.com", &strategy, true, None, None);
    }

    let store = open_store(Some(&db_path)).unwrap();
    let policies = DomainPolicyStore::with_defaults(store.clone());
    let policy = policies.get_policy("example.com");
    assert_eq!(policy.blocked_requests, 1);
    assert!(policy.current_delay_seconds > 2.0);

    let escalator = FallbackEscalator::new(FallbackSettings::default()).with_store(store);
    assert_eq!(
        escalator.starting_mode("example.com", policy.transport),
        FallbackMode::Browser
    );
}

#[test]
fn test_config_drives_job_defaults() {
    let config: Config = parse_config(
        r#"
[crawler]
start-urls = ["https://example.com/", "https://example.com/#top"]
max-depth = 3
max-pages = 25
delay-seconds = 2.5
allowed-domains = ["*.example.com"]

[user-agent]
crawler-name = "WardBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
"#,
    )
    .unwrap();

    let job = CrawlJob::from_config(&config.crawler);
    assert_eq!(job.max_depth, 3);
    assert_eq!(job.max_pages, 25);
    assert_eq!(job.delay_seconds, 2.5);

    let seeds = job.validate().unwrap();
    assert_eq!(seeds.len(), 1);
}
