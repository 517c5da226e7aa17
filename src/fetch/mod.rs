//! Page retrieval for checks.
//!
//! [`PageFetcher`] is the only blocking step of a check. The HTTP
//! implementation presents itself as a desktop browser, follows redirects
//! and keeps timeouts distinguishable from other transport failures.

pub mod detector;

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use thiserror::Error;
use tracing::debug;

use crate::monitor::models::FailureCause;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Desktop browser identities, one picked per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    pub fn cause(&self) -> FailureCause {
        match self {
            FetchError::Timeout(_) => FailureCause::Timeout,
            other => FailureCause::Transport(other.to_string()),
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Returns the page body, or an error if it could not be retrieved in time.
    async fn fetch(&self, locator: &str, timeout: Duration) -> Result<String, FetchError>;
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
    user_agent: Option<String>,
}

impl HttpPageFetcher {
    /// `user_agent` pins one identity; `None` rotates through the built-in list.
    pub fn new(user_agent: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client, user_agent })
    }

    fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or_else(|| random_user_agent())
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, locator: &str, timeout: Duration) -> Result<String, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Transport(e.to_string())
            }
        };

        let response = self
            .client
            .get(locator)
            .timeout(timeout)
            .header(USER_AGENT, self.user_agent())
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        debug!(locator, status = status.as_u16(), "Fetched page.");
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        response.text().await.map_err(classify)
    }
}
