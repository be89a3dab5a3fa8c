use crate::config::FallbackConfig;
use crate::fallback::mode::{escalation_path, rotates_proxy, trigger_delay, FallbackMode};
use crate::fallback::state::{DomainFallbackState, FallbackAttempt};
use crate::policy::{DetectionSignal, TransportKind};
use crate::store::{get_json, lock_slot, put_json, KeyValueStore, KeyedLocks};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Base of the exponential backoff component (seconds)
const BASE_DELAY_SECONDS: f64 = 1.0;

/// Highest exponent applied to the backoff base
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Lifetime of a learned preferred mode in the store
pub const PREFERRED_MODE_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub max_retries: u32,
    pub ban_duration: Duration,
    pub enable_learning: bool,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ban_duration: Duration::from_secs(3600),
            enable_learning: true,
        }
    }
}

impl From<&FallbackConfig> for FallbackSettings {
    fn from(config: &FallbackConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            ban_duration: Duration::from_secs(config.ban_duration_secs),
            enable_learning: config.enable_learning,
        }
    }
}

/// Planned next attempt for a domain after a failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackStrategy {
    pub domain: String,
    pub trigger: DetectionSignal,
    pub current_mode: FallbackMode,
    pub next_mode: FallbackMode,
    pub delay: Duration,
    pub rotate_proxy: bool,
    pub timeout: Duration,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainFallbackStats {
    pub domain: String,
    pub current_mode: FallbackMode,
    pub preferred_mode: Option<FallbackMode>,
    pub consecutive_failures: u32,
    pub is_banned: bool,
    pub banned_until: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub attempts: usize,
    pub successful_attempts: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalFallbackStats {
    pub domains: usize,
    pub banned_domains: usize,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub success_rate: f64,
    /// Attempts per target mode
    pub mode_usage: BTreeMap<String, usize>,
    /// Attempts per trigger
    pub triggers: BTreeMap<String, usize>,
}

/// Per-domain transport escalation with backoff, bans and learning
///
/// Each domain's state lives in its own lock slot and is created on first
/// use. Learned preferred modes are written through to the key-value store
/// when one is attached, so they survive restarts.
pub struct FallbackEscalator {
    settings: FallbackSettings,
    states: KeyedLocks<DomainFallbackState>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl FallbackEscalator {
    pub fn new(settings: FallbackSettings) -> Self {
        Self {
            settings,
            states: KeyedLocks::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    pub fn preferred_key(domain: &str) -> String {
        format!("fallback:preferred:{}", domain)
    }

    /// Whether another escalation step is allowed for this domain and trigger
    pub fn should_attempt_fallback(
        &self,
        domain: &str,
        trigger: DetectionSignal,
        current_mode: FallbackMode,
    ) -> bool {
        let slot = self.slot(domain);
        let mut state = lock_slot(&slot);
        self.next_mode(&mut state, trigger, current_mode, Utc::now())
            .is_some()
    }

    /// Plans the next attempt, or `None` when escalation is exhausted
    ///
    /// The next mode is the learned preferred mode when it lies on the
    /// trigger's path and differs from `current_mode`; otherwise the first
    /// mode on the path stronger than `current_mode`.
    ///
    /// The delay is `1.0 × 2^min(failures, 5)` plus a trigger constant,
    /// jittered by a factor in `[0.8, 1.2]`.
    pub fn get_fallback_strategy(
        &self,
        domain: &str,
        trigger: DetectionSignal,
        current_mode: FallbackMode,
    ) -> Option<FallbackStrategy> {
        let slot = self.slot(domain);
        let mut state = lock_slot(&slot);
        let next_mode = self.next_mode(&mut state, trigger, current_mode, Utc::now())?;

        let exponent = state.consecutive_failures.min(MAX_BACKOFF_EXPONENT);
        let base = BASE_DELAY_SECONDS * 2f64.powi(exponent as i32) + trigger_delay(trigger);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);

        let strategy = FallbackStrategy {
            domain: domain.to_string(),
            trigger,
            current_mode,
            next_mode,
            delay: Duration::from_secs_f64(base * jitter),
            rotate_proxy: rotates_proxy(trigger),
            timeout: next_mode.timeout(),
            retry_count: state.consecutive_failures + 1,
        };

        tracing::debug!(
            "Fallback for {} on {}: {} -> {} after {:.2}s (retry {})",
            domain,
            trigger,
            current_mode,
            next_mode,
            strategy.delay.as_secs_f64(),
            strategy.retry_count
        );
        Some(strategy)
    }

    /// Records how an attempt made with `strategy` went
    ///
    /// Success resets the failure count, adopts the new mode and (with
    /// learning enabled) remembers it as preferred. Failure bumps the count
    /// and bans the domain once it reaches `max_retries`.
    pub fn record_fallback_result(
        &self,
        domain: &str,
        strategy: &FallbackStrategy,
        success: bool,
        error: Option<&str>,
        latency: Option<Duration>,
    ) {
        let now = Utc::now();
        let slot = self.slot(domain);
        let mut state = lock_slot(&slot);
        lift_expired_ban(&mut state, now);

        state.push_attempt(FallbackAttempt {
            trigger: strategy.trigger,
            from_mode: strategy.current_mode,
            to_mode: strategy.next_mode,
            success,
            error: error.map(str::to_string),
            latency,
            at: now,
        });

        if success {
            state.consecutive_failures = 0;
            state.current_mode = strategy.next_mode;
            state.last_success = Some(now);

            if self.settings.enable_learning && state.preferred_mode != Some(strategy.next_mode) {
                state.preferred_mode = Some(strategy.next_mode);
                self.persist_preferred(domain, strategy.next_mode);
                tracing::info!("Learned preferred mode {} for {}", strategy.next_mode, domain);
            }
            return;
        }

        state.consecutive_failures += 1;
        state.last_failure = Some(now);

        if state.consecutive_failures >= self.settings.max_retries {
            let ban = chrono::Duration::from_std(self.settings.ban_duration)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
            state.banned_until = Some(now + ban);
            tracing::warn!(
                "Banned {} for {:?} after {} failed fallback attempts",
                domain,
                self.settings.ban_duration,
                state.consecutive_failures
            );
        }
    }

    /// Records a plain successful fetch in `mode`
    pub fn record_success(&self, domain: &str, mode: FallbackMode) {
        let slot = self.slot(domain);
        let mut state = lock_slot(&slot);
        state.consecutive_failures = 0;
        state.last_success = Some(Utc::now());
        if mode > state.current_mode {
            state.current_mode = mode;
        }
    }

    /// Mode a fresh fetch should start in
    ///
    /// The strongest of the policy's transport, the domain's current mode
    /// and its learned preferred mode.
    pub fn starting_mode(&self, domain: &str, transport: TransportKind) -> FallbackMode {
        let from_policy = FallbackMode::from(transport);
        match self.states.existing(domain) {
            Some(slot) => {
                let state = lock_slot(&slot);
                let learned = state.preferred_mode.unwrap_or_default();
                from_policy.max(state.current_mode).max(learned)
            }
            None => from_policy.max(self.load_preferred(domain).unwrap_or_default()),
        }
    }

    pub fn is_banned(&self, domain: &str) -> bool {
        self.banned_until(domain).is_some()
    }

    /// End of the active ban, if the domain is banned
    pub fn banned_until(&self, domain: &str) -> Option<DateTime<Utc>> {
        let slot = self.states.existing(domain)?;
        let state = lock_slot(&slot);
        let now = Utc::now();
        state.banned_until.filter(|_| state.is_banned(now))
    }

    /// Lifts a ban and clears the failure count
    pub fn unban_domain(&self, domain: &str) {
        if let Some(slot) = self.states.existing(domain) {
            let mut state = lock_slot(&slot);
            state.banned_until = None;
            state.consecutive_failures = 0;
            tracing::info!("Unbanned {}", domain);
        }
    }

    /// Returns a domain to its initial state
    ///
    /// The preferred mode survives when learning is enabled.
    pub fn reset_domain(&self, domain: &str) {
        if let Some(slot) = self.states.existing(domain) {
            lock_slot(&slot).reset(self.settings.enable_learning);
        }
    }

    /// Forgets the learned preferred mode, in memory and in the store
    pub fn reset_learning(&self, domain: &str) {
        if let Some(slot) = self.states.existing(domain) {
            lock_slot(&slot).preferred_mode = None;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&Self::preferred_key(domain)) {
                tracing::warn!("Failed to forget preferred mode for {}: {}", domain, e);
            }
        }
    }

    pub fn get_domain_stats(&self, domain: &str) -> Option<DomainFallbackStats> {
        let slot = self.states.existing(domain)?;
        let state = lock_slot(&slot);
        Some(domain_stats(&state, Utc::now()))
    }

    pub fn get_global_stats(&self) -> GlobalFallbackStats {
        let now = Utc::now();
        let mut stats = GlobalFallbackStats::default();

        for (_, slot) in self.states.entries() {
            let state = lock_slot(&slot);
            stats.domains += 1;
            if state.is_banned(now) {
                stats.banned_domains += 1;
            }
            for attempt in &state.history {
                stats.total_attempts += 1;
                if attempt.success {
                    stats.successful_attempts += 1;
                }
                *stats
                    .mode_usage
                    .entry(attempt.to_mode.as_str().to_string())
                    .or_default() += 1;
                *stats
                    .triggers
                    .entry(attempt.trigger.as_str().to_string())
                    .or_default() += 1;
            }
        }

        if stats.total_attempts > 0 {
            stats.success_rate = stats.successful_attempts as f64 / stats.total_attempts as f64;
        }
        stats
    }

    fn next_mode(
        &self,
        state: &mut DomainFallbackState,
        trigger: DetectionSignal,
        current_mode: FallbackMode,
        now: DateTime<Utc>,
    ) -> Option<FallbackMode> {
        lift_expired_ban(state, now);
        if state.is_banned(now) || state.consecutive_failures >= self.settings.max_retries {
            return None;
        }

        let path = escalation_path(trigger);
        let first_stronger = path.iter().copied().find(|mode| *mode > current_mode)?;

        match state.preferred_mode {
            Some(preferred) if preferred != current_mode && path.contains(&preferred) => {
                Some(preferred)
            }
            _ => Some(first_stronger),
        }
    }

    fn slot(&self, domain: &str) -> Arc<std::sync::Mutex<DomainFallbackState>> {
        self.states.slot(domain, || {
            let mut state = DomainFallbackState::new(domain);
            state.preferred_mode = self.load_preferred(domain);
            state
        })
    }

    fn load_preferred(&self, domain: &str) -> Option<FallbackMode> {
        if !self.settings.enable_learning {
            return None;
        }
        let store = self.store.as_ref()?;
        match get_json::<FallbackMode>(store.as_ref(), &Self::preferred_key(domain)) {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!("Failed to read preferred mode for {}: {}", domain, e);
                None
            }
        }
    }

    fn persist_preferred(&self, domain: &str, mode: FallbackMode) {
        if let Some(store) = &self.store {
            let key = Self::preferred_key(domain);
            if let Err(e) = put_json(store.as_ref(), &key, &mode, Some(PREFERRED_MODE_TTL)) {
                tracing::warn!("Failed to persist preferred mode for {}: {}", domain, e);
            }
        }
    }
}

fn lift_expired_ban(state: &mut DomainFallbackState, now: DateTime<Utc>) {
    if state.lift_expired_ban(now) {
        tracing::info!("Ban on {} expired, resuming fallback attempts", state.domain);
    }
}

fn domain_stats(state: &DomainFallbackState, now: DateTime<Utc>) -> DomainFallbackStats {
    let attempts = state.history.len();
    let successful_attempts = state.history.iter().filter(|a| a.success).count();
    DomainFallbackStats {
        domain: state.domain.clone(),
        current_mode: state.current_mode,
        preferred_mode: state.preferred_mode,
        consecutive_failures: state.consecutive_failures,
        is_banned: state.is_banned(now),
        banned_until: state.banned_until,
        last_failure: state.last_failure,
        last_success: state.last_success,
        attempts,
        successful_attempts,
        success_rate: if attempts == 0 {
            0.0
        } else {
            successful_attempts as f64 / attempts as f64
        },
    }
}
