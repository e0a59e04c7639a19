//! Client for a Browserless-style page rendering service.
//!
//! The service loads a URL in a real browser, waits for network idle, and
//! returns the rendered DOM serialization. The client owns the whole outcome
//! classification: timeouts, transport failures, API errors, and bodies too
//! small to be a real render each come back as a distinct `RenderError`, so
//! callers can treat `content()` as a single-shot fetch with no vetting of
//! their own.

pub mod error;

pub use error::RenderError;

use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RenderClient {
    client: reqwest::Client,
    endpoint: String,
    min_content_len: usize,
}

impl RenderClient {
    /// `min_content_len` is the smallest body accepted as a real render;
    /// anything shorter is reported as `RenderError::EmptyRender`.
    pub fn new(base_url: &str, token: Option<&str>, min_content_len: usize) -> Self {
        Self::with_timeout(base_url, token, min_content_len, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<&str>,
        min_content_len: usize,
        timeout: Duration,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        let endpoint = match token {
            Some(token) => format!("{base}/content?token={token}"),
            None => format!("{base}/content"),
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            endpoint,
            min_content_len,
        }
    }

    /// Render `url` and return the serialized DOM.
    pub async fn content(&self, url: &str) -> Result<String, RenderError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "url": url,
                "waitUntil": "networkidle2",
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RenderError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body = resp.text().await?;
        if body.len() < self.min_content_len {
            return Err(RenderError::EmptyRender { len: body.len() });
        }
        Ok(body)
    }
}
