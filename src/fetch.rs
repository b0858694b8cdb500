use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{FETCH_TIMEOUT_SECS, USER_AGENT};
use crate::error::{Result, ScraperError};

/// Fetches one page body as text
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String>;
}

/// reqwest-backed fetcher with a fixed user agent and request timeout.
/// Non-2xx responses come back as errors so scrapers can fold them into a
/// failed outcome instead of panicking.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self { client }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ScraperError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::Fetch(format!(
                "GET {} returned status {}",
                url, status
            )));
        }

        let body = response.text().await?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}
