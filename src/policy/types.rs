use crate::policy::responder::AppliedAction;
use crate::policy::signal::DetectionSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lowest delay a domain policy may hold (seconds)
pub const MIN_DELAY_SECONDS: f64 = 2.0;

/// Highest delay a domain policy may hold (seconds)
pub const MAX_DELAY_SECONDS: f64 = 60.0;

/// Number of detection signals retained per domain
pub const SIGNAL_HISTORY_LIMIT: usize = 10;

/// Number of applied responder actions retained per domain
pub const ACTION_HISTORY_LIMIT: usize = 5;

/// Transport a domain policy asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Http,
    Browser,
}

/// Class of egress proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyClass {
    #[default]
    Datacenter,
    Residential,
}

impl ProxyClass {
    pub fn toggled(self) -> Self {
        match self {
            Self::Datacenter => Self::Residential,
            Self::Residential => Self::Datacenter,
        }
    }

    /// Session policy implied by this proxy class
    pub fn session_policy(self) -> SessionPolicy {
        match self {
            Self::Datacenter => SessionPolicy::Rotating,
            Self::Residential => SessionPolicy::Sticky,
        }
    }
}

/// Whether one proxy is kept for a whole session or rotated per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    #[default]
    Rotating,
    Sticky,
}

/// Browser header profile sent with requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderFamily {
    #[default]
    Chrome,
    Firefox,
}

impl HeaderFamily {
    pub fn toggled(self) -> Self {
        match self {
            Self::Chrome => Self::Firefox,
            Self::Firefox => Self::Chrome,
        }
    }

    /// Request headers for this profile
    pub fn headers(self) -> Vec<(String, String)> {
        let pairs: &[(&str, &str)] = match self {
            Self::Chrome => &[
                (
                    "User-Agent",
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
                ),
                (
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,\
                     image/avif,image/webp,*/*;q=0.8",
                ),
                ("Accept-Language", "en-US,en;q=0.9"),
                ("Sec-Ch-Ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\""),
                ("Sec-Ch-Ua-Mobile", "?0"),
                ("Sec-Ch-Ua-Platform", "\"Windows\""),
                ("Upgrade-Insecure-Requests", "1"),
            ],
            Self::Firefox => &[
                (
                    "User-Agent",
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) \
                     Gecko/20100101 Firefox/125.0",
                ),
                (
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                ),
                ("Accept-Language", "en-US,en;q=0.5"),
                ("DNT", "1"),
                ("Upgrade-Insecure-Requests", "1"),
            ],
        };

        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Discrete risk tier derived from a domain's error rate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    #[default]
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Maps an error rate in `[0, 1]` to its risk tier
    ///
    /// | error rate | tier |
    /// |------------|------|
    /// | > 0.8 | Critical |
    /// | > 0.6 | High |
    /// | > 0.4 | Medium |
    /// | > 0.2 | Low |
    /// | otherwise | VeryLow |
    pub fn from_error_rate(error_rate: f64) -> Self {
        if error_rate > 0.8 {
            Self::Critical
        } else if error_rate > 0.6 {
            Self::High
        } else if error_rate > 0.4 {
            Self::Medium
        } else if error_rate > 0.2 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adaptive fetch configuration for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPolicy {
    pub domain: String,
    pub transport: TransportKind,
    pub proxy_class: ProxyClass,
    pub session_policy: SessionPolicy,
    pub header_family: HeaderFamily,
    pub current_delay_seconds: f64,
    pub backoff_until: Option<DateTime<Utc>>,
    pub error_rate: f64,
    pub risk_level: RiskLevel,
    pub signal_history: VecDeque<DetectionSignal>,
    pub action_history: VecDeque<AppliedAction>,
    pub last_detection: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub updated_at: DateTime<Utc>,
}

impl DomainPolicy {
    /// Creates the default policy for a domain
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            transport: TransportKind::Http,
            proxy_class: ProxyClass::Datacenter,
            session_policy: SessionPolicy::Rotating,
            header_family: HeaderFamily::Chrome,
            current_delay_seconds: MIN_DELAY_SECONDS,
            backoff_until: None,
            error_rate: 0.0,
            risk_level: RiskLevel::VeryLow,
            signal_history: VecDeque::new(),
            action_history: VecDeque::new(),
            last_detection: None,
            total_requests: 0,
            blocked_requests: 0,
            updated_at: Utc::now(),
        }
    }

    /// Sets the delay, clamped to the allowed range
    pub fn set_delay(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() {
            seconds
        } else {
            MAX_DELAY_SECONDS
        };
        self.current_delay_seconds = seconds.clamp(MIN_DELAY_SECONDS, MAX_DELAY_SECONDS);
    }

    /// Doubles the delay up to the cap
    pub fn double_delay(&mut self) {
        self.set_delay(self.current_delay_seconds * 2.0);
    }

    pub fn set_proxy_class(&mut self, class: ProxyClass) {
        self.proxy_class = class;
        self.session_policy = class.session_policy();
    }

    /// Counts one request outcome and refreshes the derived fields
    pub fn record_request(&mut self, blocked: bool) {
        self.total_requests += 1;
        if blocked {
            self.blocked_requests += 1;
        }
        self.refresh_risk();
    }

    /// Recomputes error rate and risk level from the counters
    pub fn refresh_risk(&mut self) {
        self.error_rate = if self.total_requests == 0 {
            0.0
        } else {
            self.blocked_requests as f64 / self.total_requests as f64
        };
        self.risk_level = RiskLevel::from_error_rate(self.error_rate);
    }

    pub fn push_signal(&mut self, signal: DetectionSignal, at: DateTime<Utc>) {
        if self.signal_history.len() >= SIGNAL_HISTORY_LIMIT {
            self.signal_history.pop_front();
        }
        self.signal_history.push_back(signal);
        self.last_detection = Some(at);
    }

    pub fn push_action(&mut self, action: AppliedAction) {
        if self.action_history.len() >= ACTION_HISTORY_LIMIT {
            self.action_history.pop_front();
        }
        self.action_history.push_back(action);
    }

    /// Time left before the domain may be fetched again
    pub fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.backoff_until
            .and_then(|until| (until - now).to_std().ok())
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_risk_thresholds() {
        assert_eq!(RiskLevel::from_error_rate(0.0), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_error_rate(0.2), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_error_rate(0.21), RiskLevel::Low);
        assert_eq!(RiskLevel::from_error_rate(0.41), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_error_rate(0.61), RiskLevel::High);
        assert_eq!(RiskLevel::from_error_rate(0.8), RiskLevel::High);
        assert_eq!(RiskLevel::from_error_rate(0.81), RiskLevel::Critical);
        assert!(RiskLevel::Critical > RiskLevel::High);
    }

    #[test]
    fn test_delay_clamped() {
        let mut policy = DomainPolicy::new("example.com");
        policy.set_delay(0.5);
        assert_eq!(policy.current_delay_seconds, MIN_DELAY_SECONDS);
        policy.set_delay(500.0);
        assert_eq!(policy.current_delay_seconds, MAX_DELAY_SECONDS);
        policy.set_delay(f64::NAN);
        assert_eq!(policy.current_delay_seconds, MAX_DELAY_SECONDS);
    }

    #[test]
    fn test_residential_implies_sticky() {
        let mut policy = DomainPolicy::new("example.com");
        policy.set_proxy_class(ProxyClass::Residential);
        assert_eq!(policy.session_policy, SessionPolicy::Sticky);
        policy.set_proxy_class(ProxyClass::Datacenter);
        assert_eq!(policy.session_policy, SessionPolicy::Rotating);
    }

    #[test]
    fn test_histories_are_bounded() {
        let mut policy = DomainPolicy::new("example.com");
        for _ in 0..25 {
            policy.push_signal(DetectionSignal::RateLimited, Utc::now());
        }
        assert_eq!(policy.signal_history.len(), SIGNAL_HISTORY_LIMIT);
        assert!(policy.last_detection.is_some());
    }

    #[test]
    fn test_record_request_updates_risk() {
        let mut policy = DomainPolicy::new("example.com");
        policy.record_request(true);
        policy.record_request(true);
        policy.record_request(false);
        assert!((policy.error_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(policy.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_backoff_remaining() {
        let now = Utc::now();
        let mut policy = DomainPolicy::new("example.com");
        assert!(policy.backoff_remaining(now).is_none());

        policy.backoff_until = Some(now + Duration::seconds(30));
        let remaining = policy.backoff_remaining(now).unwrap();
        assert_eq!(remaining.as_secs(), 30);

        policy.backoff_until = Some(now - Duration::seconds(5));
        assert!(policy.backoff_remaining(now).is_none());
    }

    #[test]
    fn test_header_profiles_differ() {
        let chrome = HeaderFamily::Chrome.headers();
        let firefox = HeaderFamily::Firefox.headers();
        let ua = |h: &[(String, String)]| {
            h.iter()
                .find(|(k, _)| k == "User-Agent")
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert!(ua(&chrome).contains("Chrome"));
        assert!(ua(&firefox).contains("Firefox"));
    }
}
