//! Proxy pool
//!
//! This module tracks egress proxies and their health:
//! - `ProxyRecord` with an exponential moving average of success
//! - Weighted random selection with a weight floor
//! - Bounded concurrent validation through a `ProxyProbe`
//! - Cleanup of long-inactive proxies and optional store persistence

mod pool;
mod probe;
mod record;

pub use pool::{ProxyPool, ProxyPoolSettings, ProxyPoolStats, ProxyQuery, ValidationSummary};
pub use probe::{ProbeError, ProxyProbe, ReqwestProxyProbe};
pub use record::{Anonymity, ProxyProtocol, ProxyRecord, ProxyStatus, INITIAL_SUCCESS_RATE};
