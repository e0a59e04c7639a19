//! Two-tier page fetching.
//!
//! `DirectFetcher` does plain HTTP with a rotating user-agent and an optional
//! outbound proxy. Notice boards sit behind anti-automation defenses that
//! serve interstitial pages to obvious bots, so a response is only accepted
//! when the body is plausibly large. `TieredFetcher` exhausts direct attempts
//! first and falls back exactly once to a rendered-page fetch through a
//! browser engine.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

use render_client::{RenderClient, RenderError};

/// Browser user-agents rotated across direct attempts. Stale strings get
/// flagged by bot defenses faster than they age out of real browsers.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// Request-scoped fetch configuration. Passed in explicitly; there is no
/// process-wide fetch state.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub attempts: u32,
    pub timeout: Duration,
    /// Bodies below this length are treated as anti-bot interstitials.
    pub min_content_len: usize,
    pub proxy_url: Option<String>,
    /// Base delay between direct attempts. Actual delay escalates per attempt
    /// plus random jitter.
    pub retry_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(30),
            min_content_len: 512,
            proxy_url: None,
            retry_base: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch timed out")]
    Timeout,

    #[error("body implausibly small ({len} bytes)")]
    TooSmall { len: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait FetchStrategy: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
    fn name(&self) -> &str;
}

// --- Direct HTTP fetcher ---

pub struct DirectFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl DirectFetcher {
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(settings.timeout);
        if let Some(ref proxy) = settings.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;
        Ok(Self { client, settings })
    }

    async fn attempt(&self, url: &str) -> Result<String, FetchError> {
        let ua = USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())];
        let resp = self
            .client
            .get(url)
            .header("User-Agent", ua)
            .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        if body.len() < self.settings.min_content_len {
            return Err(FetchError::TooSmall { len: body.len() });
        }
        Ok(body)
    }
}

#[async_trait]
impl FetchStrategy for DirectFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut last_err = FetchError::Transport("no attempts made".into());

        for attempt in 0..self.settings.attempts {
            if attempt > 0 {
                let backoff = self.settings.retry_base * attempt;
                let jitter = Duration::from_millis(rand::rng().random_range(0..500));
                tokio::time::sleep(backoff + jitter).await;
            }

            match self.attempt(url).await {
                Ok(body) => {
                    info!(url, fetcher = "direct", bytes = body.len(), "Fetched");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(url, fetcher = "direct", attempt = attempt + 1, error = %e, "Fetch attempt failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    fn name(&self) -> &str {
        "direct"
    }
}

// --- Rendered-page fetcher ---

/// One-shot fetch through a real rendering engine. No retry loop of its own:
/// the render service already waits for network idle, and the tiered policy
/// only calls this once.
pub struct RenderedFetcher {
    client: RenderClient,
}

impl RenderedFetcher {
    pub fn new(base_url: &str, token: Option<&str>, min_content_len: usize) -> Self {
        Self {
            client: RenderClient::new(base_url, token, min_content_len),
        }
    }
}

#[async_trait]
impl FetchStrategy for RenderedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let body = self.client.content(url).await.map_err(|e| match e {
            RenderError::Timeout => FetchError::Timeout,
            RenderError::EmptyRender { len } => FetchError::TooSmall { len },
            RenderError::Api { status, .. } => FetchError::Status(status),
            RenderError::Network(message) => FetchError::Transport(message),
        })?;

        info!(url, fetcher = "rendered", bytes = body.len(), "Fetched");
        Ok(body)
    }

    fn name(&self) -> &str {
        "rendered"
    }
}

// --- Tiered policy ---

/// Try the direct strategy, then fall back exactly once to the rendered
/// strategy. If no rendered strategy is configured, the direct error stands.
pub struct TieredFetcher {
    direct: Box<dyn FetchStrategy>,
    rendered: Option<Box<dyn FetchStrategy>>,
}

impl TieredFetcher {
    pub fn new(direct: Box<dyn FetchStrategy>, rendered: Option<Box<dyn FetchStrategy>>) -> Self {
        Self { direct, rendered }
    }
}

#[async_trait]
impl FetchStrategy for TieredFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let direct_err = match self.direct.fetch(url).await {
            Ok(body) => return Ok(body),
            Err(e) => e,
        };

        let Some(ref rendered) = self.rendered else {
            return Err(direct_err);
        };

        warn!(url, error = %direct_err, "Direct fetch exhausted, falling back to rendered");
        rendered.fetch(url).await
    }

    fn name(&self) -> &str {
        "tiered"
    }
}
