use crate::policy::{ProxyClass, ResponseRule};
use crate::proxy::{ProxyProtocol, ProxyRecord};
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Sumi-Ward
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default, rename = "responder-rules")]
    pub responder_rules: Vec<ResponseRule>,
    #[serde(default)]
    pub proxies: Vec<ProxyEntry>,
}

/// Crawl job defaults and engine limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Seed URLs, crawled at depth 0
    pub start_urls: Vec<String>,

    /// Maximum link depth from a seed
    pub max_depth: u32,

    /// Maximum number of results per job
    pub max_pages: usize,

    /// Maximum number of fetches in flight across all domains
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Minimum spacing between fetches to one domain (seconds)
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,

    #[serde(default = "default_true")]
    pub respect_robots: bool,

    /// Fallback attempts allowed per URL after the first fetch
    #[serde(default = "default_max_url_retries")]
    pub max_url_retries: u32,

    /// Route fetches through the proxy pool
    #[serde(default)]
    pub use_proxies: bool,

    /// Domain patterns links may lead to (e.g. "*.example.com").
    /// Empty keeps the crawl on the seeds' own domains.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler, also the robots.txt agent token
    pub crawler_name: String,

    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// URL filtering and robots.txt settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolitenessConfig {
    /// File extensions that may be fetched; extensionless paths always pass.
    /// An empty list disables the check.
    pub allowed_extensions: Vec<String>,

    /// Regexes matched against the path; a match blocks the URL
    pub disallow_patterns: Vec<String>,

    /// Regexes matched against the path; when non-empty the path must match one
    pub allow_patterns: Vec<String>,

    /// Regexes matched against path and query to avoid crawler traps
    pub honeypot_patterns: Vec<String>,

    pub robots_ttl_hours: u64,

    pub robots_timeout_secs: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: [
                "html", "htm", "xhtml", "shtml", "php", "asp", "aspx", "jsp", "cfm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            disallow_patterns: Vec::new(),
            allow_patterns: Vec::new(),
            honeypot_patterns: [
                r"(?i)honeypot",
                r"(?i)/trap(/|$|\?|\.)",
                r"(?i)bot-?trap",
                r"(?i)/(wp-admin|cgi-bin)/",
                r"(?i)/calendar/\d{4}/\d{2}/\d{2}/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            robots_ttl_hours: 24,
            robots_timeout_secs: 10,
        }
    }
}

/// Fallback escalation limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FallbackConfig {
    pub max_retries: u32,
    pub ban_duration_secs: u64,
    pub enable_learning: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ban_duration_secs: 3600,
            enable_learning: true,
        }
    }
}

/// Proxy validation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProxyConfig {
    pub test_url: String,
    pub validation_timeout_secs: u64,
    pub validation_concurrency: usize,
    pub max_inactive_age_hours: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            test_url: "https://httpbin.org/ip".to_string(),
            validation_timeout_secs: 10,
            validation_concurrency: 10,
            max_inactive_age_hours: 24,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StoreConfig {
    /// SQLite file; in-memory store when absent
    pub database_path: Option<PathBuf>,

    /// Lifetime of stored domain policies (seconds)
    pub policy_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            policy_ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// A proxy listed in the configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyEntry {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    pub country: Option<String>,
    pub class: Option<ProxyClass>,
    pub source: Option<String>,
}

impl ProxyEntry {
    pub fn to_record(&self) -> ProxyRecord {
        let mut record = ProxyRecord::new(self.host.clone(), self.port, self.protocol);
        record.username = self.username.clone();
        record.password = self.password.clone();
        record.country = self.country.clone();
        record.class = self.class;
        record.source = Some(self.source.clone().unwrap_or_else(|| "config".to_string()));
        record
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_delay_seconds() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_max_url_retries() -> u32 {
    3
}
