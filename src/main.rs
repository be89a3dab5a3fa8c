//! Sumi-Ward main entry point
//!
//! This is the command-line interface for the Sumi-Ward adaptive crawler.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use sumi_ward::config::{load_config_with_hash, Config};
use sumi_ward::crawler::{CrawlEngine, CrawlJob, EngineSettings, ReqwestFetchClient};
use sumi_ward::fallback::{FallbackEscalator, FallbackSettings};
use sumi_ward::metrics::{self, InMemoryMetrics};
use sumi_ward::output::{print_summary, CrawlSummary};
use sumi_ward::policy::{AdaptiveResponder, DomainPolicyStore};
use sumi_ward::proxy::{
    ProxyPool, ProxyPoolSettings, ProxyProtocol, ProxyRecord, ReqwestProxyProbe,
};
use sumi_ward::robots::{ReqwestRobotsFetcher, RobotsPolicyCache};
use sumi_ward::store::open_store;
use tracing_subscriber::EnvFilter;

/// Sumi-Ward: an adaptive, polite crawler
///
/// Sumi-Ward crawls breadth-first while adapting each domain's fetch
/// strategy (delay, headers, proxy class, transport) to the blocking
/// signals it observes.
#[derive(Parser, Debug)]
#[command(name = "sumi-ward")]
#[command(version = "1.0.0")]
#[command(about = "An adaptive, polite crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Extra proxies, one `[scheme://][user:pass@]host:port` per line
    #[arg(long, value_name = "FILE")]
    proxy_file: Option<PathBuf>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["validate_proxies", "recommend"])]
    dry_run: bool,

    /// Validate all configured proxies and print pool statistics
    #[arg(long, conflicts_with_all = ["dry_run", "recommend"])]
    validate_proxies: bool,

    /// Print the recommended fetch settings for a domain and exit
    #[arg(long, value_name = "DOMAIN", conflicts_with_all = ["dry_run", "validate_proxies"])]
    recommend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let mut extra_proxies = Vec::new();
    if let Some(path) = &cli.proxy_file {
        extra_proxies = load_proxy_file(path)?;
        tracing::info!("Loaded {} proxies from {}", extra_proxies.len(), path.display());
    }

    if cli.dry_run {
        handle_dry_run(&config, extra_proxies.len());
        return Ok(());
    }

    let components = Components::build(&config, extra_proxies)?;

    if cli.validate_proxies {
        handle_validate_proxies(&components).await;
    } else if let Some(domain) = &cli.recommend {
        handle_recommend(&components, domain)?;
    } else {
        handle_crawl(&config, components).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_ward=info,warn"),
            1 => EnvFilter::new("sumi_ward=debug,info"),
            2 => EnvFilter::new("sumi_ward=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Shared collaborators built from the configuration
struct Components {
    policies: Arc<DomainPolicyStore>,
    robots: Arc<RobotsPolicyCache>,
    escalator: Arc<FallbackEscalator>,
    proxies: Arc<ProxyPool>,
    fetcher: Arc<ReqwestFetchClient>,
}

impl Components {
    fn build(config: &Config, extra_proxies: Vec<ProxyRecord>) -> anyhow::Result<Self> {
        let store = open_store(config.store.database_path.as_deref())
            .context("failed to open store")?;

        let responder = AdaptiveResponder::from_rules_or_default(&config.responder_rules);
        let policies = Arc::new(DomainPolicyStore::new(
            store.clone(),
            responder,
            std::time::Duration::from_secs(config.store.policy_ttl_secs),
        ));

        let client = sumi_ward::crawler::build_http_client(&config.user_agent)
            .context("failed to build HTTP client")?;
        let robots = Arc::new(RobotsPolicyCache::new(
            Arc::new(ReqwestRobotsFetcher::new(client)),
            policies.clone(),
            &config.politeness,
            &config.user_agent.crawler_name,
        )?);

        let escalator = Arc::new(
            FallbackEscalator::new(FallbackSettings::from(&config.fallback))
                .with_store(store.clone()),
        );

        let proxies = Arc::new(
            ProxyPool::new(
                Arc::new(ReqwestProxyProbe::new()),
                ProxyPoolSettings::from(&config.proxy),
            )
            .with_store(store.clone()),
        );
        let restored = proxies.load_from_store();
        if restored > 0 {
            tracing::info!("Restored {} proxies from the store", restored);
        }
        for entry in &config.proxies {
            proxies.add_proxy(entry.to_record());
        }
        for record in extra_proxies {
            proxies.add_proxy(record);
        }

        let fetcher = Arc::new(
            ReqwestFetchClient::new(&config.user_agent).context("failed to build fetch client")?,
        );

        Ok(Self {
            policies,
            robots,
            escalator,
            proxies,
            fetcher,
        })
    }
}

/// Parses a proxy list file
///
/// Blank lines and lines starting with `#` are ignored. Entries without a
/// scheme are treated as HTTP proxies.
fn load_proxy_file(path: &Path) -> anyhow::Result<Vec<ProxyRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read proxy file {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            parse_proxy_line(line)
                .with_context(|| format!("{}:{}: invalid proxy '{}'", path.display(), line_no, line))
        })
        .collect()
}

fn parse_proxy_line(line: &str) -> anyhow::Result<ProxyRecord> {
    let with_scheme = if line.contains("://") {
        line.to_string()
    } else {
        format!("http://{}", line)
    };
    let url = url::Url::parse(&with_scheme)?;

    let protocol = match url.scheme() {
        "http" => ProxyProtocol::Http,
        "https" => ProxyProtocol::Https,
        "socks5" | "socks5h" => ProxyProtocol::Socks5,
        other => bail!("unsupported proxy scheme '{}'", other),
    };
    let Some(host) = url.host_str() else {
        bail!("missing host");
    };
    let Some(port) = url.port() else {
        bail!("missing port");
    };

    let mut record = ProxyRecord::new(host, port, protocol);
    record.source = Some("file".to_string());
    if !url.username().is_empty() {
        record = record.with_credentials(url.username(), url.password().unwrap_or_default());
    }
    Ok(record)
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, file_proxies: usize) {
    println!("=== Sumi-Ward Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max pages: {}", config.crawler.max_pages);
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!("  Minimum delay: {}s", config.crawler.delay_seconds);
    println!("  Respect robots.txt: {}", config.crawler.respect_robots);
    println!("  Retries per URL: {}", config.crawler.max_url_retries);
    println!("  Use proxies: {}", config.crawler.use_proxies);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.user_agent_string());

    println!("\nFallback:");
    println!("  Max retries: {}", config.fallback.max_retries);
    println!("  Ban duration: {}s", config.fallback.ban_duration_secs);
    println!("  Learning: {}", config.fallback.enable_learning);

    println!("\nStore:");
    match &config.store.database_path {
        Some(path) => println!("  Database: {}", path.display()),
        None => println!("  In-memory"),
    }

    println!("\nStart URLs ({}):", config.crawler.start_urls.len());
    for url in &config.crawler.start_urls {
        println!("  - {}", url);
    }

    if !config.crawler.allowed_domains.is_empty() {
        println!("\nAllowed Domains:");
        for pattern in &config.crawler.allowed_domains {
            println!("  - {}", pattern);
        }
    }

    println!(
        "\nProxies: {} configured, {} from file",
        config.proxies.len(),
        file_proxies
    );
    println!(
        "Responder rules: {}",
        if config.responder_rules.is_empty() {
            "built-in".to_string()
        } else {
            format!("{} custom", config.responder_rules.len())
        }
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the --validate-proxies mode
async fn handle_validate_proxies(components: &Components) {
    println!("=== Proxy Validation ===\n");

    if components.proxies.is_empty() {
        println!("No proxies configured");
        return;
    }

    let summary = components.proxies.validate_all_proxies().await;
    println!(
        "Checked {}: {} active, {} inactive",
        summary.checked, summary.active, summary.inactive
    );

    let stats = components.proxies.get_stats();
    println!("Average success rate: {:.2}", stats.average_success_rate);
    if let Some(rt) = stats.average_response_time {
        println!("Average response time: {}ms", rt.as_millis());
    }
}

/// Handles the --recommend mode
fn handle_recommend(components: &Components, domain: &str) -> anyhow::Result<()> {
    let recommended = components.policies.get_recommended_config(domain);
    println!("{}", serde_json::to_string_pretty(&recommended)?);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, components: Components) -> anyhow::Result<()> {
    let mut engine = CrawlEngine::new(
        components.fetcher.clone(),
        components.policies.clone(),
        components.robots.clone(),
        components.escalator.clone(),
    )
    .with_settings(EngineSettings::from(&config.crawler));

    let engine_metrics = Arc::new(InMemoryMetrics::new());
    engine = engine.with_metrics(engine_metrics.clone());

    if config.crawler.use_proxies {
        if components.proxies.is_empty() {
            tracing::warn!("use-proxies is set but no proxies are configured");
        } else {
            let summary = components.proxies.validate_all_proxies().await;
            tracing::info!(
                "Validated {} proxies: {} active",
                summary.checked,
                summary.active
            );
            engine = engine.with_proxies(components.proxies.clone());
        }
    }

    let job = CrawlJob::from_config(&config.crawler);
    let cancel = job.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight fetches");
            cancel.cancel();
        }
    });

    tracing::info!(
        "Starting crawl {} from {} start URLs",
        job.id,
        job.start_urls.len()
    );
    let started = Instant::now();
    let results = engine.crawl(&job).await?;

    let max_age = std::time::Duration::from_secs(config.proxy.max_inactive_age_hours * 3600);
    components.proxies.cleanup_inactive_proxies(max_age);

    let summary = CrawlSummary::from_results(&job.id, &results, started.elapsed());
    let proxy_stats = components.proxies.get_stats();
    let fallback_stats = components.escalator.get_global_stats();
    print_summary(&summary, Some(&proxy_stats), Some(&fallback_stats));

    let snapshot = engine_metrics.snapshot();
    println!("\nEngine:");
    println!("  URLs skipped: {}", snapshot.counter(metrics::URLS_SKIPPED));
    println!("  Fallback attempts: {}", snapshot.counter(metrics::FALLBACK_ATTEMPTS));
    println!("  Detections: {}", snapshot.counter(metrics::DETECTIONS));
    if let Some(mean) = snapshot
        .timers
        .get(metrics::FETCH_LATENCY)
        .and_then(|t| t.mean())
    {
        println!("  Mean fetch latency: {}ms", mean.as_millis());
    }

    tracing::debug!(
        "{} domain policies known after crawl",
        components.policies.known_domains().len()
    );

    Ok(())
}
