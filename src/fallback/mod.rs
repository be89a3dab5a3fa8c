//! Transport fallback escalation
//!
//! When a fetch fails, the escalator decides which stronger transport mode
//! to try next, how long to wait, and whether to rotate the proxy. Repeated
//! failures ban the domain for a while.
//!
//! Escalation paths are explicit per-trigger tables (see
//! [`escalation_path`]); a domain never moves to a mode that is not on the
//! path for the signal that caused the failure.

mod escalator;
mod mode;
mod state;

pub use escalator::{
    DomainFallbackStats, FallbackEscalator, FallbackSettings, FallbackStrategy,
    GlobalFallbackStats, PREFERRED_MODE_TTL,
};
pub use mode::{escalation_path, rotates_proxy, trigger_delay, FallbackMode};
pub use state::{DomainFallbackState, FallbackAttempt, ATTEMPT_HISTORY_LIMIT};
