use crate::policy::{DetectionSignal, TransportKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fetch strategy tier, ordered from weakest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackMode {
    #[default]
    Http,
    Browser,
    StealthBrowser,
}

impl FallbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
            Self::StealthBrowser => "stealth_browser",
        }
    }

    /// Request timeout for this mode
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Http => Duration::from_secs(30),
            Self::Browser => Duration::from_secs(60),
            Self::StealthBrowser => Duration::from_secs(90),
        }
    }
}

impl From<TransportKind> for FallbackMode {
    fn from(transport: TransportKind) -> Self {
        match transport {
            TransportKind::Http => Self::Http,
            TransportKind::Browser => Self::Browser,
        }
    }
}

impl std::fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const FULL_PATH: &[FallbackMode] = &[
    FallbackMode::Http,
    FallbackMode::Browser,
    FallbackMode::StealthBrowser,
];
const NETWORK_PATH: &[FallbackMode] = &[FallbackMode::Http, FallbackMode::Browser];
const CHALLENGE_PATH: &[FallbackMode] = &[FallbackMode::Browser, FallbackMode::StealthBrowser];
const STEALTH_PATH: &[FallbackMode] = &[FallbackMode::StealthBrowser];

/// Ordered modes reachable when escalating for `trigger`
///
/// | trigger | path |
/// |---------|------|
/// | HttpError, RateLimited, BlockedIp | http → browser → stealth_browser |
/// | Timeout, ConnectionError | http → browser |
/// | CaptchaDetected, JavascriptRequired | browser → stealth_browser |
/// | CloudflareDetected | stealth_browser |
pub fn escalation_path(trigger: DetectionSignal) -> &'static [FallbackMode] {
    match trigger {
        DetectionSignal::HttpError | DetectionSignal::RateLimited | DetectionSignal::BlockedIp => {
            FULL_PATH
        }
        DetectionSignal::Timeout | DetectionSignal::ConnectionError => NETWORK_PATH,
        DetectionSignal::CaptchaDetected | DetectionSignal::JavascriptRequired => CHALLENGE_PATH,
        DetectionSignal::CloudflareDetected => STEALTH_PATH,
    }
}

/// Extra backoff added on top of the exponential component (seconds)
pub fn trigger_delay(trigger: DetectionSignal) -> f64 {
    match trigger {
        DetectionSignal::RateLimited => 5.0,
        DetectionSignal::BlockedIp => 10.0,
        DetectionSignal::CaptchaDetected => 2.0,
        DetectionSignal::CloudflareDetected => 15.0,
        _ => 0.0,
    }
}

/// Whether escalating for `trigger` should also switch proxies
pub fn rotates_proxy(trigger: DetectionSignal) -> bool {
    matches!(
        trigger,
        DetectionSignal::BlockedIp
            | DetectionSignal::RateLimited
            | DetectionSignal::CloudflareDetected
    )
}
