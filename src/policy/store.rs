use crate::policy::responder::{AdaptiveResponder, ResponseAction};
use crate::policy::signal::DetectionSignal;
use crate::policy::types::{
    DomainPolicy, HeaderFamily, ProxyClass, RiskLevel, SessionPolicy, TransportKind,
};
use crate::store::{get_json, lock_slot, put_json, KeyValueStore, KeyedLocks};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of a stored domain policy
pub const DEFAULT_POLICY_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Status codes that trigger a policy escalation
const ESCALATION_STATUSES: &[u16] = &[403, 429, 503];

/// Requests needed before a recommendation reaches full confidence
const CONFIDENCE_SAMPLE_SIZE: f64 = 50.0;

/// Suggested fetch settings for a domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedConfig {
    pub domain: String,
    pub transport: TransportKind,
    pub proxy_class: ProxyClass,
    pub delay_seconds: f64,
    pub headers: Vec<(String, String)>,
    pub session_policy: SessionPolicy,
    pub risk_level: RiskLevel,
    pub confidence: f64,
}

/// Per-domain adaptive policies backed by a key-value store
///
/// Every read-modify-write for a domain runs under that domain's lock slot.
/// Store failures never reach the caller: they are logged and the call
/// continues with an in-memory default.
pub struct DomainPolicyStore {
    store: Arc<dyn KeyValueStore>,
    responder: AdaptiveResponder,
    ttl: Duration,
    locks: KeyedLocks<()>,
}

impl DomainPolicyStore {
    pub fn new(store: Arc<dyn KeyValueStore>, responder: AdaptiveResponder, ttl: Duration) -> Self {
        Self {
            store,
            responder,
            ttl,
            locks: KeyedLocks::new(),
        }
    }

    /// Store with the built-in responder table and the default TTL
    pub fn with_defaults(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, AdaptiveResponder::default(), DEFAULT_POLICY_TTL)
    }

    pub fn policy_key(domain: &str) -> String {
        format!("policy:{}", domain)
    }

    pub fn responder(&self) -> &AdaptiveResponder {
        &self.responder
    }

    /// Returns the stored policy for `domain`, or a fresh default
    pub fn get_policy(&self, domain: &str) -> DomainPolicy {
        let slot = self.locks.slot(domain, || ());
        let _guard = lock_slot(&slot);
        self.load(domain)
    }

    /// Records a failed request and escalates the policy when blocking is evident
    ///
    /// Escalation applies when the status is 403, 429 or 503, or the signal
    /// is a CAPTCHA:
    ///
    /// 1. The delay doubles (capped at 60s)
    /// 2. `backoff_until` is set to now + delay × 5
    /// 3. The header family moves chrome → firefox; if it is already firefox,
    ///    the proxy class moves datacenter → residential
    /// 4. The transport is forced to browser
    ///
    /// Failures that do not escalate are handed to the responder rule table.
    ///
    /// # Returns
    ///
    /// The updated policy
    pub fn update_on_failure(
        &self,
        domain: &str,
        status_code: Option<u16>,
        signal: DetectionSignal,
    ) -> DomainPolicy {
        let escalate = status_code.is_some_and(|s| ESCALATION_STATUSES.contains(&s))
            || signal == DetectionSignal::CaptchaDetected;

        let policy = self.mutate(domain, |policy| {
            let now = Utc::now();
            policy.record_request(true);
            policy.push_signal(signal, now);

            if escalate {
                escalate_policy(policy, now);
            } else {
                self.responder.respond(policy, signal, now);
            }
        });

        if escalate {
            tracing::info!(
                "Escalated policy for {} after {} ({:?}): delay {:.1}s, headers {:?}, proxy {:?}",
                domain,
                signal,
                status_code,
                policy.current_delay_seconds,
                policy.header_family,
                policy.proxy_class
            );
        }
        self.bump_counter("stats:blocked_requests");

        policy
    }

    /// Records a successful request and relaxes the delay
    pub fn update_on_success(&self, domain: &str) -> DomainPolicy {
        let policy = self.mutate(domain, |policy| {
            policy.record_request(false);
            policy.set_delay(policy.current_delay_seconds * 0.95);
        });
        self.bump_counter("stats:successful_requests");
        policy
    }

    /// Current risk level for `domain`
    pub fn assess_risk(&self, domain: &str) -> RiskLevel {
        RiskLevel::from_error_rate(self.get_policy(domain).error_rate)
    }

    /// Records a detection signal and lets the responder adjust the policy
    ///
    /// # Returns
    ///
    /// The actions the responder applied
    pub fn add_detection_signal(&self, domain: &str, signal: DetectionSignal) -> Vec<ResponseAction> {
        let mut applied = Vec::new();
        self.mutate(domain, |policy| {
            let now = Utc::now();
            policy.push_signal(signal, now);
            policy.refresh_risk();
            applied = self.responder.respond(policy, signal, now);
        });
        applied
    }

    /// Time left on the domain's backoff, if any
    pub fn backoff_remaining(&self, domain: &str) -> Option<Duration> {
        self.get_policy(domain).backoff_remaining(Utc::now())
    }

    /// Suggested fetch settings for `domain`
    ///
    /// Confidence grows with the number of observed requests (full at 50)
    /// and shrinks with the error rate.
    pub fn get_recommended_config(&self, domain: &str) -> RecommendedConfig {
        let policy = self.get_policy(domain);
        let sample = (policy.total_requests as f64 / CONFIDENCE_SAMPLE_SIZE).min(1.0);

        RecommendedConfig {
            domain: policy.domain.clone(),
            transport: policy.transport,
            proxy_class: policy.proxy_class,
            delay_seconds: policy.current_delay_seconds,
            headers: policy.header_family.headers(),
            session_policy: policy.session_policy,
            risk_level: policy.risk_level,
            confidence: sample * (1.0 - policy.error_rate),
        }
    }

    /// Domains with a live stored policy
    pub fn known_domains(&self) -> Vec<String> {
        match self.store.list_keys("policy:") {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix("policy:").map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list stored policies: {}", e);
                Vec::new()
            }
        }
    }

    fn mutate(&self, domain: &str, f: impl FnOnce(&mut DomainPolicy)) -> DomainPolicy {
        let slot = self.locks.slot(domain, || ());
        let _guard = lock_slot(&slot);

        let mut policy = self.load(domain);
        f(&mut policy);
        policy.updated_at = Utc::now();
        self.save(&policy);
        policy
    }

    fn load(&self, domain: &str) -> DomainPolicy {
        match get_json::<DomainPolicy>(self.store.as_ref(), &Self::policy_key(domain)) {
            Ok(Some(policy)) => policy,
            Ok(None) => DomainPolicy::new(domain),
            Err(e) => {
                tracing::warn!("Policy store unavailable for {}, using defaults: {}", domain, e);
                DomainPolicy::new(domain)
            }
        }
    }

    fn save(&self, policy: &DomainPolicy) {
        let key = Self::policy_key(&policy.domain);
        if let Err(e) = put_json(self.store.as_ref(), &key, policy, Some(self.ttl)) {
            tracing::warn!("Failed to persist policy for {}: {}", policy.domain, e);
        }
    }

    fn bump_counter(&self, counter: &str) {
        if let Err(e) = self.store.incr(counter) {
            tracing::debug!("Failed to increment {}: {}", counter, e);
        }
    }
}

fn escalate_policy(policy: &mut DomainPolicy, now: chrono::DateTime<Utc>) {
    policy.double_delay();
    let backoff_ms = (policy.current_delay_seconds * 5.0 * 1000.0) as i64;
    policy.backoff_until = Some(now + ChronoDuration::milliseconds(backoff_ms));

    match policy.header_family {
        HeaderFamily::Chrome => policy.header_family = HeaderFamily::Firefox,
        HeaderFamily::Firefox => {
            if policy.proxy_class == ProxyClass::Datacenter {
                policy.set_proxy_class(ProxyClass::Residential);
            }
        }
    }

    policy.transport = TransportKind::Browser;
}
