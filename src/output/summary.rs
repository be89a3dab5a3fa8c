use crate::crawler::CrawlResult;
use crate::fallback::GlobalFallbackStats;
use crate::proxy::ProxyPoolStats;
use crate::url::domain_from_str;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Aggregate view of one crawl job
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlSummary {
    pub job_id: String,
    pub total_results: usize,
    pub successes: usize,
    pub failures: usize,

    /// Results per final transport mode
    pub by_mode: BTreeMap<String, usize>,

    /// Results per status code; "none" when no response was received
    pub by_status: BTreeMap<String, usize>,

    pub unique_domains: usize,
    pub links_found: usize,

    /// Results that needed more than one attempt
    pub retried: usize,

    pub max_depth_reached: u32,
    pub elapsed: Duration,
}

impl CrawlSummary {
    pub fn from_results(job_id: &str, results: &[CrawlResult], elapsed: Duration) -> Self {
        let mut summary = CrawlSummary {
            job_id: job_id.to_string(),
            total_results: results.len(),
            elapsed,
            ..CrawlSummary::default()
        };
        let mut domains = HashSet::new();

        for result in results {
            if result.success {
                summary.successes += 1;
            } else {
                summary.failures += 1;
            }
            *summary
                .by_mode
                .entry(result.mode.as_str().to_string())
                .or_insert(0) += 1;

            let status = result
                .status_code
                .map_or_else(|| "none".to_string(), |s| s.to_string());
            *summary.by_status.entry(status).or_insert(0) += 1;

            if let Ok(domain) = domain_from_str(&result.url) {
                domains.insert(domain);
            }
            summary.links_found += result.extracted_links.len();
            if result.attempts > 1 {
                summary.retried += 1;
            }
            summary.max_depth_reached = summary.max_depth_reached.max(result.depth);
        }

        summary.unique_domains = domains.len();
        summary
    }

    /// Share of results that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_results == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total_results as f64 * 100.0
    }
}

/// Prints the summary to stdout
pub fn print_summary(
    summary: &CrawlSummary,
    proxies: Option<&ProxyPoolStats>,
    fallback: Option<&GlobalFallbackStats>,
) {
    println!("=== Crawl Summary ({}) ===\n", summary.job_id);

    println!("Overview:");
    println!("  Results: {}", summary.total_results);
    println!(
        "  Succeeded: {} ({:.1}%)",
        summary.successes,
        summary.success_rate()
    );
    println!("  Failed: {}", summary.failures);
    println!("  Needed fallback: {}", summary.retried);
    println!("  Domains: {}", summary.unique_domains);
    println!("  Links found: {}", summary.links_found);
    println!("  Deepest level: {}", summary.max_depth_reached);
    println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    println!("Results by Mode:");
    for (mode, count) in &summary.by_mode {
        println!("  {}: {}", mode, count);
    }
    println!();

    println!("Results by Status:");
    let mut statuses: Vec<_> = summary.by_status.iter().collect();
    statuses.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (status, count) in statuses {
        println!("  {}: {}", status, count);
    }
    println!();

    if let Some(stats) = proxies.filter(|s| s.total > 0) {
        println!("Proxies:");
        println!(
            "  {} total, {} active, {} inactive, {} blocked",
            stats.total, stats.active, stats.inactive, stats.blocked
        );
        println!(
            "  Average success rate: {:.2}",
            stats.average_success_rate
        );
        println!();
    }

    if let Some(stats) = fallback.filter(|s| s.total_attempts > 0) {
        println!("Fallback:");
        println!(
            "  {} attempts across {} domains ({:.1}% successful)",
            stats.total_attempts,
            stats.domains,
            stats.success_rate * 100.0
        );
        println!("  Banned domains: {}", stats.banned_domains);
        for (trigger, count) in &stats.triggers {
            println!("  {}: {}", trigger, count);
        }
    }
}
