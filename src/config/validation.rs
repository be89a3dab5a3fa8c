use crate::config::types::{
    Config, CrawlerConfig, FallbackConfig, PolitenessConfig, ProxyConfig, ProxyEntry,
    UserAgentConfig,
};
use crate::policy::ResponseRule;
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_politeness_config(&config.politeness)?;
    validate_fallback_config(&config.fallback)?;
    validate_proxy_config(&config.proxy)?;
    validate_proxy_entries(&config.proxies)?;
    validate_responder_rules(&config.responder_rules)?;

    if config.store.policy_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "policy_ttl_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.start_urls.is_empty() {
        return Err(ConfigError::Validation(
            "start_urls must contain at least one URL".to_string(),
        ));
    }

    for seed in &config.start_urls {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Start URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.max_concurrency < 1 || config.max_concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and 100, got {}",
            config.max_concurrency
        )));
    }

    if !config.delay_seconds.is_finite() || config.delay_seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "delay_seconds must be a non-negative number, got {}",
            config.delay_seconds
        )));
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    for pattern in config
        .disallow_patterns
        .iter()
        .chain(&config.allow_patterns)
        .chain(&config.honeypot_patterns)
    {
        Regex::new(pattern)
            .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))?;
    }

    if let Some(ext) = config
        .allowed_extensions
        .iter()
        .find(|ext| ext.is_empty() || ext.contains('.') || ext.contains('/'))
    {
        return Err(ConfigError::Validation(format!(
            "allowed_extensions entries must be bare extensions like 'html', got '{}'",
            ext
        )));
    }

    if config.robots_ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "robots_ttl_hours must be >= 1".to_string(),
        ));
    }

    if config.robots_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "robots_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_fallback_config(config: &FallbackConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "fallback max_retries must be >= 1, got {}",
            config.max_retries
        )));
    }
    Ok(())
}

fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    Url::parse(&config.test_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy test_url: {}", e)))?;

    if config.validation_concurrency < 1 {
        return Err(ConfigError::Validation(
            "validation_concurrency must be >= 1".to_string(),
        ));
    }

    if config.validation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "validation_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_proxy_entries(entries: &[ProxyEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        if entry.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "proxy host cannot be empty".to_string(),
            ));
        }
        if entry.port == 0 {
            return Err(ConfigError::Validation(format!(
                "proxy {} has invalid port 0",
                entry.host
            )));
        }
        if entry.username.is_some() != entry.password.is_some() {
            return Err(ConfigError::Validation(format!(
                "proxy {}:{} must set both username and password or neither",
                entry.host, entry.port
            )));
        }
    }
    Ok(())
}

fn validate_responder_rules(rules: &[ResponseRule]) -> Result<(), ConfigError> {
    if let Some(rule) = rules.iter().find(|r| r.actions.is_empty()) {
        return Err(ConfigError::Validation(format!(
            "responder rule for '{}' has no actions",
            rule.signal
        )));
    }
    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
