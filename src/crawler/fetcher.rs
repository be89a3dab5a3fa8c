//! Page fetching
//!
//! The engine talks to the network only through `FetchClient`:
//! - `FetchRequest` carries the URL, transport mode, proxy, headers and timeout
//! - `FetchResponse` is any HTTP response, blocked or not
//! - `FetchError` covers failures that produced no response
//!
//! `ReqwestFetchClient` serves all three modes over reqwest. Browser modes
//! are approximated with full browser header profiles; a real browser
//! backend plugs in through the same trait.

use crate::config::UserAgentConfig;
use crate::fallback::FallbackMode;
use crate::policy::DetectionSignal;
use crate::proxy::ProxyRecord;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum redirects followed per request
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub mode: FallbackMode,
    pub proxy: Option<ProxyRecord>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// URL after redirects
    pub url: Url,
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Whether the body should be parsed for links
    pub fn is_html(&self) -> bool {
        self.content_type()
            .map_or(true, |ct| ct.contains("html"))
    }
}

/// Failure that produced no usable response
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connection(String),

    /// The transport itself recognized a block (e.g. a browser hit a challenge page)
    #[error("Blocked: {0}")]
    Blocked(DetectionSignal),

    #[error("Request failed: {0}")]
    Other(String),
}

impl FetchError {
    /// Detection signal fed to the policy store and escalator
    pub fn signal(&self) -> DetectionSignal {
        match self {
            Self::Timeout(_) => DetectionSignal::Timeout,
            Self::Connection(_) => DetectionSignal::ConnectionError,
            Self::Blocked(signal) => *signal,
            Self::Other(_) => DetectionSignal::HttpError,
        }
    }
}

#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Builds the shared HTTP client
///
/// # Arguments
///
/// * `config` - Crawler identity used as the default user agent
///
/// # Returns
///
/// * `Ok(Client)` - Client with compression and bounded redirects
/// * `Err(reqwest::Error)` - The client could not be built
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    client_builder(config).build()
}

fn client_builder(config: &UserAgentConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(config.user_agent_string())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
}

/// `FetchClient` backed by reqwest
///
/// In `Http` mode the crawler keeps its identifying user agent and only
/// borrows the profile's content negotiation headers. Browser modes send
/// the full profile; stealth mode adds fetch-metadata headers on top.
pub struct ReqwestFetchClient {
    user_agent: UserAgentConfig,
    direct: Client,
    /// One client per proxy, built on first use
    proxied: Mutex<HashMap<String, Client>>,
}

impl ReqwestFetchClient {
    pub fn new(user_agent: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            user_agent: user_agent.clone(),
            direct: build_http_client(user_agent)?,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyRecord>) -> Result<Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&proxy.key()) {
            return Ok(client.clone());
        }

        let mut upstream = reqwest::Proxy::all(proxy.url())
            .map_err(|e| FetchError::Other(format!("invalid proxy {}: {}", proxy.key(), e)))?;
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            upstream = upstream.basic_auth(user, pass);
        }

        let client = client_builder(&self.user_agent)
            .proxy(upstream)
            .build()
            .map_err(|e| FetchError::Other(e.to_string()))?;
        clients.insert(proxy.key(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl FetchClient for ReqwestFetchClient {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(request.proxy.as_ref())?;
        let mut builder = client.get(request.url.as_str()).timeout(request.timeout);

        for (name, value) in &request.headers {
            if request.mode == FallbackMode::Http && name.eq_ignore_ascii_case("user-agent") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        if request.mode == FallbackMode::StealthBrowser {
            builder = builder
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "none")
                .header("Sec-Fetch-User", "?1");
        }

        let response = builder.send().await.map_err(|e| classify_error(e, request.timeout))?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| classify_error(e, request.timeout))?;

        Ok(FetchResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

fn classify_error(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(timeout)
    } else if error.is_connect() {
        FetchError::Connection(error.to_string())
    } else {
        FetchError::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestWard".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&create_test_config()).is_ok());
    }

    #[test]
    fn test_fetch_error_signals() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(30)).signal(),
            DetectionSignal::Timeout
        );
        assert_eq!(
            FetchError::Connection("refused".to_string()).signal(),
            DetectionSignal::ConnectionError
        );
        assert_eq!(
            FetchError::Blocked(DetectionSignal::CaptchaDetected).signal(),
            DetectionSignal::CaptchaDetected
        );
        assert_eq!(
            FetchError::Other("tls".to_string()).signal(),
            DetectionSignal::HttpError
        );
    }

    #[test]
    fn test_response_helpers() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/pdf".to_string());
        let response = FetchResponse {
            url: Url::parse("https://a.com/x.pdf").unwrap(),
            status: 200,
            headers,
            body: String::new(),
        };
        assert!(response.is_success());
        assert!(!response.is_html());
    }

    #[test]
    fn test_proxied_clients_are_reused() {
        let fetcher = ReqwestFetchClient::new(&create_test_config()).unwrap();
        let proxy = ProxyRecord::new("127.0.0.1", 3128, crate::proxy::ProxyProtocol::Http);

        fetcher.client_for(Some(&proxy)).unwrap();
        fetcher.client_for(Some(&proxy)).unwrap();
        assert_eq!(fetcher.proxied.lock().unwrap().len(), 1);
    }
}
