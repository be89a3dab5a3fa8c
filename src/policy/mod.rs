//! Per-domain adaptive fetch policy
//!
//! This module owns the policy side of the resilience core:
//! - `DomainPolicy` and its enums (transport, proxy class, headers, risk)
//! - Detection signal classification from responses
//! - The data-driven `AdaptiveResponder` rule table
//! - `DomainPolicyStore`, which persists policies in a key-value store

mod responder;
mod signal;
mod store;
mod types;

pub use responder::{AdaptiveResponder, AppliedAction, ResponseAction, ResponseRule};
pub use signal::{classify_response, DetectionSignal};
pub use store::{DomainPolicyStore, RecommendedConfig, DEFAULT_POLICY_TTL};
pub use types::{
    DomainPolicy, HeaderFamily, ProxyClass, RiskLevel, SessionPolicy, TransportKind,
    MAX_DELAY_SECONDS, MIN_DELAY_SECONDS,
};
