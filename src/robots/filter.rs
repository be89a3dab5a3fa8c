use crate::config::PolitenessConfig;
use crate::WardError;
use regex::Regex;
use url::Url;

/// Why a URL may or may not be crawled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlDecision {
    Allowed,
    /// Path or query matched a crawler-trap pattern
    Honeypot { pattern: String },
    /// File extension outside the allow-list
    ExtensionNotAllowed { extension: String },
    /// Path matched a configured disallow pattern
    PatternDisallowed { pattern: String },
    /// Allow patterns are configured and none matched
    NotInAllowList,
    /// robots.txt disallows our agent
    RobotsDisallowed,
}

impl CrawlDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Short label used for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Honeypot { .. } => "honeypot",
            Self::ExtensionNotAllowed { .. } => "extension",
            Self::PatternDisallowed { .. } => "disallow_pattern",
            Self::NotInAllowList => "allow_list",
            Self::RobotsDisallowed => "robots",
        }
    }
}

/// Compiled URL rules that apply regardless of robots.txt
#[derive(Debug, Clone)]
pub struct UrlFilter {
    allowed_extensions: Vec<String>,
    disallow: Vec<Regex>,
    allow: Vec<Regex>,
    honeypots: Vec<Regex>,
}

impl UrlFilter {
    pub fn from_config(config: &PolitenessConfig) -> Result<Self, WardError> {
        Ok(Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            disallow: compile_all(&config.disallow_patterns)?,
            allow: compile_all(&config.allow_patterns)?,
            honeypots: compile_all(&config.honeypot_patterns)?,
        })
    }

    /// Applies the honeypot, extension and pattern rules, in that order
    pub fn check(&self, url: &Url) -> CrawlDecision {
        let path = url.path();
        let target = match url.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        };

        if let Some(re) = self.honeypots.iter().find(|re| re.is_match(&target)) {
            return CrawlDecision::Honeypot {
                pattern: re.as_str().to_string(),
            };
        }

        if let Some(extension) = path_extension(path) {
            if !self.allowed_extensions.is_empty() && !self.allowed_extensions.contains(&extension)
            {
                return CrawlDecision::ExtensionNotAllowed { extension };
            }
        }

        if let Some(re) = self.disallow.iter().find(|re| re.is_match(path)) {
            return CrawlDecision::PatternDisallowed {
                pattern: re.as_str().to_string(),
            };
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|re| re.is_match(path)) {
            return CrawlDecision::NotInAllowList;
        }

        CrawlDecision::Allowed
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, WardError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| WardError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Lowercase extension of the last path segment, if it has one
fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}
