use crate::policy::ProxyClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weight of the newest observation in the success-rate moving average
pub const SUCCESS_RATE_ALPHA: f64 = 0.2;

/// Success rate assigned to a proxy that has never been observed
pub const INITIAL_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyStatus {
    #[default]
    Unknown,
    Active,
    Inactive,
    Testing,
    Blocked,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Testing => "testing",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
    #[default]
    Unknown,
}

/// An egress proxy and its observed health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    pub status: ProxyStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub response_time: Option<Duration>,
    pub source: Option<String>,
    pub country: Option<String>,
    pub anonymity: Anonymity,
    pub class: Option<ProxyClass>,
}

impl ProxyRecord {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            username: None,
            password: None,
            status: ProxyStatus::Unknown,
            last_checked: None,
            success_rate: INITIAL_SUCCESS_RATE,
            response_time: None,
            source: None,
            country: None,
            anonymity: Anonymity::Unknown,
            class: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_class(mut self, class: ProxyClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_status(mut self, status: ProxyStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Uniqueness key, `host:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL without credentials
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    /// Folds one observation into the success-rate moving average
    pub fn observe(&mut self, success: bool) {
        let sample = if success { 1.0 } else { 0.0 };
        self.success_rate =
            self.success_rate * (1.0 - SUCCESS_RATE_ALPHA) + sample * SUCCESS_RATE_ALPHA;
    }

    /// Selection weight, floored so no proxy is starved entirely
    pub fn weight(&self) -> f64 {
        self.success_rate.max(0.1)
    }

    pub fn is_active(&self) -> bool {
        self.status == ProxyStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_url() {
        let record = ProxyRecord::new("10.0.0.1", 8080, ProxyProtocol::Socks5);
        assert_eq!(record.key(), "10.0.0.1:8080");
        assert_eq!(record.url(), "socks5://10.0.0.1:8080");
    }

    #[test]
    fn test_observe_is_ema() {
        let mut record = ProxyRecord::new("h", 1, ProxyProtocol::Http);
        record.observe(true);
        assert!((record.success_rate - 0.6).abs() < 1e-9);
        record.observe(false);
        assert!((record.success_rate - 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_weight_floor() {
        let record = ProxyRecord::new("h", 1, ProxyProtocol::Http).with_success_rate(0.0);
        assert_eq!(record.weight(), 0.1);
        let record = record.with_success_rate(0.9);
        assert_eq!(record.weight(), 0.9);
    }
}
