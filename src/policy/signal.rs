use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classified indicator that a fetch was blocked, challenged or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSignal {
    HttpError,
    RateLimited,
    BlockedIp,
    CaptchaDetected,
    CloudflareDetected,
    Timeout,
    ConnectionError,
    JavascriptRequired,
}

impl DetectionSignal {
    pub const ALL: [DetectionSignal; 8] = [
        Self::HttpError,
        Self::RateLimited,
        Self::BlockedIp,
        Self::CaptchaDetected,
        Self::CloudflareDetected,
        Self::Timeout,
        Self::ConnectionError,
        Self::JavascriptRequired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpError => "http_error",
            Self::RateLimited => "rate_limited",
            Self::BlockedIp => "blocked_ip",
            Self::CaptchaDetected => "captcha_detected",
            Self::CloudflareDetected => "cloudflare_detected",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::JavascriptRequired => "javascript_required",
        }
    }
}

impl std::fmt::Display for DetectionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CLOUDFLARE_BODY_MARKERS: &[&str] = &[
    "cf-chl",
    "cf_chl_opt",
    "challenge-platform",
    "just a moment...",
    "attention required! | cloudflare",
];

/// Widget markers only; prose mentioning "captcha" is not a challenge
const CAPTCHA_BODY_MARKERS: &[&str] = &["g-recaptcha", "h-captcha", "hcaptcha", "cf-turnstile"];

const JAVASCRIPT_BODY_MARKERS: &[&str] = &[
    "enable javascript",
    "javascript is required",
    "javascript is disabled",
];

/// Classifies a non-success HTTP response into a detection signal
///
/// Returns `None` for 2xx responses. Header names are expected lowercase.
///
/// # Classification Order
///
/// | Condition | Signal |
/// |-----------|--------|
/// | 429 | RateLimited |
/// | Cloudflare challenge markers (header or body) | CloudflareDetected |
/// | CAPTCHA widget markers in body | CaptchaDetected |
/// | 403 | BlockedIp |
/// | "enable javascript" style body | JavascriptRequired |
/// | anything else | HttpError |
pub fn classify_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> Option<DetectionSignal> {
    if (200..300).contains(&status) {
        return None;
    }

    if status == 429 {
        return Some(DetectionSignal::RateLimited);
    }

    let body = body.to_lowercase();

    if is_cloudflare_challenge(status, headers, &body) {
        return Some(DetectionSignal::CloudflareDetected);
    }

    if CAPTCHA_BODY_MARKERS.iter().any(|m| body.contains(m)) {
        return Some(DetectionSignal::CaptchaDetected);
    }

    if status == 403 {
        return Some(DetectionSignal::BlockedIp);
    }

    if JAVASCRIPT_BODY_MARKERS.iter().any(|m| body.contains(m)) {
        return Some(DetectionSignal::JavascriptRequired);
    }

    Some(DetectionSignal::HttpError)
}

fn is_cloudflare_challenge(status: u16, headers: &HashMap<String, String>, body: &str) -> bool {
    if headers.contains_key("cf-mitigated") {
        return true;
    }

    let served_by_cloudflare = headers
        .get("server")
        .is_some_and(|v| v.to_lowercase().contains("cloudflare"));

    (status == 403 || status == 503)
        && (served_by_cloudflare && CLOUDFLARE_BODY_MARKERS.iter().any(|m| body.contains(m))
            || body.contains("cf-chl"))
}
