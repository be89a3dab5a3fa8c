use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// What a robots.txt request produced
#[derive(Debug, Clone, PartialEq)]
pub enum RobotsFetchOutcome {
    /// The file was served
    Body(String),
    /// The host has no robots.txt (4xx)
    Missing,
    /// Network failure, timeout or server error
    Failed(String),
}

/// Retrieves robots.txt files
#[async_trait]
pub trait RobotsFetcher: Send + Sync {
    async fn fetch(&self, robots_url: &Url, timeout: Duration) -> RobotsFetchOutcome;
}

/// Robots fetcher backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestRobotsFetcher {
    client: Client,
}

impl ReqwestRobotsFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RobotsFetcher for ReqwestRobotsFetcher {
    async fn fetch(&self, robots_url: &Url, timeout: Duration) -> RobotsFetchOutcome {
        let response = match self
            .client
            .get(robots_url.as_str())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RobotsFetchOutcome::Failed(e.to_string()),
        };

        let status = response.status();
        if status.is_client_error() {
            return RobotsFetchOutcome::Missing;
        }
        if !status.is_success() {
            return RobotsFetchOutcome::Failed(format!("HTTP {}", status.as_u16()));
        }

        match response.text().await {
            Ok(body) => RobotsFetchOutcome::Body(body),
            Err(e) => RobotsFetchOutcome::Failed(e.to_string()),
        }
    }
}
