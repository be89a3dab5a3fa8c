//! Signal-driven policy adjustments
//!
//! The responder is a plain rule table: each rule names a detection signal,
//! an optional minimum risk level, and the ordered actions to apply. Tables
//! are loaded from configuration (`[[responder-rules]]`) or fall back to
//! [`AdaptiveResponder::default_rules`].

use crate::policy::signal::DetectionSignal;
use crate::policy::types::{DomainPolicy, RiskLevel, TransportKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long `PauseDomain` holds a domain back (seconds)
pub const PAUSE_DURATION_SECS: i64 = 3600;

/// A concrete mutation of a domain policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseAction {
    IncreaseDelay,
    RotateProxy,
    SwitchHeader,
    FallbackToBrowser,
    PauseDomain,
}

impl ResponseAction {
    /// Applies this action to `policy`
    pub fn apply(self, policy: &mut DomainPolicy, now: DateTime<Utc>) {
        match self {
            Self::IncreaseDelay => policy.double_delay(),
            Self::RotateProxy => policy.set_proxy_class(policy.proxy_class.toggled()),
            Self::SwitchHeader => policy.header_family = policy.header_family.toggled(),
            Self::FallbackToBrowser => policy.transport = TransportKind::Browser,
            Self::PauseDomain => {
                policy.backoff_until = Some(now + Duration::seconds(PAUSE_DURATION_SECS))
            }
        }
    }
}

/// One row of the responder table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResponseRule {
    pub signal: DetectionSignal,
    /// Rule only fires once the domain's risk reaches this level
    #[serde(default)]
    pub min_risk: Option<RiskLevel>,
    pub actions: Vec<ResponseAction>,
}

impl ResponseRule {
    pub fn new(signal: DetectionSignal, actions: Vec<ResponseAction>) -> Self {
        Self {
            signal,
            min_risk: None,
            actions,
        }
    }

    pub fn at_risk(mut self, min_risk: RiskLevel) -> Self {
        self.min_risk = Some(min_risk);
        self
    }

    fn matches(&self, signal: DetectionSignal, risk: RiskLevel) -> bool {
        self.signal == signal && self.min_risk.map_or(true, |min| risk >= min)
    }
}

/// Record of an action the responder applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAction {
    pub action: ResponseAction,
    pub signal: DetectionSignal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AdaptiveResponder {
    rules: Vec<ResponseRule>,
}

impl Default for AdaptiveResponder {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl AdaptiveResponder {
    pub fn new(rules: Vec<ResponseRule>) -> Self {
        Self { rules }
    }

    /// Builds a responder from configured rules, using the defaults when none are given
    pub fn from_rules_or_default(rules: &[ResponseRule]) -> Self {
        if rules.is_empty() {
            Self::default()
        } else {
            Self::new(rules.to_vec())
        }
    }

    /// Built-in rule table
    pub fn default_rules() -> Vec<ResponseRule> {
        use DetectionSignal::*;
        use ResponseAction::*;

        vec![
            ResponseRule::new(RateLimited, vec![IncreaseDelay, RotateProxy]),
            ResponseRule::new(BlockedIp, vec![RotateProxy, SwitchHeader]),
            ResponseRule::new(CaptchaDetected, vec![FallbackToBrowser, SwitchHeader]),
            ResponseRule::new(CloudflareDetected, vec![FallbackToBrowser, IncreaseDelay]),
            ResponseRule::new(JavascriptRequired, vec![FallbackToBrowser]),
            ResponseRule::new(Timeout, vec![IncreaseDelay]),
            ResponseRule::new(ConnectionError, vec![RotateProxy]).at_risk(RiskLevel::Medium),
            ResponseRule::new(RateLimited, vec![PauseDomain]).at_risk(RiskLevel::Critical),
            ResponseRule::new(BlockedIp, vec![PauseDomain]).at_risk(RiskLevel::Critical),
            ResponseRule::new(CloudflareDetected, vec![PauseDomain]).at_risk(RiskLevel::Critical),
        ]
    }

    pub fn rules(&self) -> &[ResponseRule] {
        &self.rules
    }

    /// Ordered actions for a signal at the given risk level
    pub fn actions_for(&self, signal: DetectionSignal, risk: RiskLevel) -> Vec<ResponseAction> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(signal, risk))
            .flat_map(|rule| rule.actions.iter().copied())
            .collect()
    }

    /// Applies every matching action to `policy` and records it
    ///
    /// # Returns
    ///
    /// The actions that were applied, in order
    pub fn respond(
        &self,
        policy: &mut DomainPolicy,
        signal: DetectionSignal,
        now: DateTime<Utc>,
    ) -> Vec<ResponseAction> {
        let actions = self.actions_for(signal, policy.risk_level);
        for action in &actions {
            action.apply(policy, now);
            policy.push_action(AppliedAction {
                action: *action,
                signal,
                at: now,
            });
        }

        if !actions.is_empty() {
            tracing::debug!(
                "Responder applied {:?} to {} for {}",
                actions,
                policy.domain,
                signal
            );
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::{HeaderFamily, ProxyClass, SessionPolicy, ACTION_HISTORY_LIMIT};

    #[test]
    fn test_each_action() {
        let now = Utc::now();
        let mut policy = DomainPolicy::new("example.com");

        ResponseAction::IncreaseDelay.apply(&mut policy, now);
        assert_eq!(policy.current_delay_seconds, 4.0);

        ResponseAction::RotateProxy.apply(&mut policy, now);
        assert_eq!(policy.proxy_class, ProxyClass::Residential);
        assert_eq!(policy.session_policy, SessionPolicy::Sticky);

        ResponseAction::SwitchHeader.apply(&mut policy, now);
        assert_eq!(policy.header_family, HeaderFamily::Firefox);

        ResponseAction::FallbackToBrowser.apply(&mut policy, now);
        assert_eq!(policy.transport, TransportKind::Browser);

        ResponseAction::PauseDomain.apply(&mut policy, now);
        assert_eq!(
            policy.backoff_until,
            Some(now + Duration::seconds(PAUSE_DURATION_SECS))
        );
    }

    #[test]
    fn test_min_risk_gates_rules() {
        let responder = AdaptiveResponder::default();
        let calm = responder.actions_for(DetectionSignal::RateLimited, RiskLevel::VeryLow);
        assert!(!calm.contains(&ResponseAction::PauseDomain));

        let critical = responder.actions_for(DetectionSignal::RateLimited, RiskLevel::Critical);
        assert!(critical.contains(&ResponseAction::PauseDomain));
    }

    #[test]
    fn test_custom_table() {
        let responder = AdaptiveResponder::new(vec![ResponseRule::new(
            DetectionSignal::HttpError,
            vec![ResponseAction::SwitchHeader],
        )]);
        let mut policy = DomainPolicy::new("example.com");
        let applied = responder.respond(&mut policy, DetectionSignal::HttpError, Utc::now());

        assert_eq!(applied, vec![ResponseAction::SwitchHeader]);
        assert_eq!(policy.header_family, HeaderFamily::Firefox);
        assert!(responder
            .actions_for(DetectionSignal::RateLimited, RiskLevel::Critical)
            .is_empty());
    }

    #[test]
    fn test_action_history_bounded() {
        let responder = AdaptiveResponder::default();
        let mut policy = DomainPolicy::new("example.com");
        for _ in 0..10 {
            responder.respond(&mut policy, DetectionSignal::RateLimited, Utc::now());
        }
        assert_eq!(policy.action_history.len(), ACTION_HISTORY_LIMIT);
        assert_eq!(policy.current_delay_seconds, 60.0);
    }

    #[test]
    fn test_rule_from_toml() {
        let rule: ResponseRule = toml::from_str(
            r#"
signal = "captcha-detected"
min-risk = "high"
actions = ["fallback-to-browser", "pause-domain"]
"#,
        )
        .unwrap();
        assert_eq!(rule.signal, DetectionSignal::CaptchaDetected);
        assert_eq!(rule.min_risk, Some(RiskLevel::High));
        assert_eq!(rule.actions.len(), 2);
    }
}
