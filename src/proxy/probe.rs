use crate::proxy::record::ProxyRecord;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Proxy probe timed out")]
    Timeout,

    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    #[error("Proxy request failed: {0}")]
    Request(String),
}

/// Issues a single test request through a proxy
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// Requests `test_url` through `proxy` and returns the HTTP status
    async fn probe(
        &self,
        proxy: &ProxyRecord,
        test_url: &str,
        timeout: Duration,
    ) -> Result<u16, ProbeError>;
}

/// Probe backed by a dedicated reqwest client per proxy
#[derive(Debug, Default, Clone)]
pub struct ReqwestProxyProbe;

impl ReqwestProxyProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProxyProbe for ReqwestProxyProbe {
    async fn probe(
        &self,
        proxy: &ProxyRecord,
        test_url: &str,
        timeout: Duration,
    ) -> Result<u16, ProbeError> {
        let mut reqwest_proxy = reqwest::Proxy::all(proxy.url())
            .map_err(|e| ProbeError::InvalidProxy(e.to_string()))?;
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            reqwest_proxy = reqwest_proxy.basic_auth(user, pass);
        }

        let client = reqwest::Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::InvalidProxy(e.to_string()))?;

        match client.get(test_url).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout),
            Err(e) => Err(ProbeError::Request(e.to_string())),
        }
    }
}
