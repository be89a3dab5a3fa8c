use crate::fallback::mode::FallbackMode;
use crate::policy::DetectionSignal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of fallback attempts retained per domain
pub const ATTEMPT_HISTORY_LIMIT: usize = 20;

/// One recorded fallback attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackAttempt {
    pub trigger: DetectionSignal,
    pub from_mode: FallbackMode,
    pub to_mode: FallbackMode,
    pub success: bool,
    pub error: Option<String>,
    pub latency: Option<Duration>,
    pub at: DateTime<Utc>,
}

/// Escalation state for one domain
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFallbackState {
    pub domain: String,
    pub current_mode: FallbackMode,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub banned_until: Option<DateTime<Utc>>,
    pub preferred_mode: Option<FallbackMode>,
    pub history: VecDeque<FallbackAttempt>,
}

impl DomainFallbackState {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            current_mode: FallbackMode::Http,
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
            banned_until: None,
            preferred_mode: None,
            history: VecDeque::new(),
        }
    }

    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned_until.is_some_and(|until| now < until)
    }

    /// Clears a ban whose window has passed, along with the failure count
    /// that caused it. Returns whether a ban was lifted.
    pub fn lift_expired_ban(&mut self, now: DateTime<Utc>) -> bool {
        if !self.banned_until.is_some_and(|until| now >= until) {
            return false;
        }
        self.banned_until = None;
        self.consecutive_failures = 0;
        true
    }

    pub fn push_attempt(&mut self, attempt: FallbackAttempt) {
        if self.history.len() >= ATTEMPT_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(attempt);
    }

    /// Clears failure tracking and the ban; optionally keeps the learned mode
    pub fn reset(&mut self, keep_preferred: bool) {
        let preferred = if keep_preferred {
            self.preferred_mode
        } else {
            None
        };
        *self = Self::new(&self.domain);
        self.preferred_mode = preferred;
    }
}
