//! Discord-style webhook implementation of the notification channel:
//! multipart POST with an embed payload part plus one part per file.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::deliver::{Announcement, ChannelLimits, NotificationChannel, SendError};

pub struct WebhookChannel {
    client: reqwest::Client,
    webhook_url: String,
    limits: ChannelLimits,
}

impl WebhookChannel {
    pub fn new(webhook_url: &str, limits: ChannelLimits) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            webhook_url: webhook_url.to_string(),
            limits,
        }
    }

    fn payload_json(announcement: &Announcement) -> serde_json::Value {
        let mut embed = serde_json::json!({
            "title": announcement.title,
            "description": announcement.description,
            "footer": { "text": announcement.footer },
            "timestamp": announcement.timestamp.to_rfc3339(),
        });
        if !announcement.url.is_empty() {
            embed["url"] = serde_json::Value::String(announcement.url.clone());
        }
        serde_json::json!({ "embeds": [embed] })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, announcement: &Announcement) -> Result<(), SendError> {
        let payload = Self::payload_json(announcement);
        let mut form = Form::new().text(
            "payload_json",
            serde_json::to_string(&payload)
                .map_err(|e| SendError::Terminal(format!("payload serialization: {e}")))?,
        );

        for (idx, file) in announcement.files.iter().enumerate() {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|e| SendError::Terminal(format!("staged file unreadable: {e}")))?;
            form = form.part(
                format!("files[{idx}]"),
                Part::bytes(bytes).file_name(file.display_name.clone()),
            );
        }

        let resp = self
            .client
            .post(&self.webhook_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Transient(format!("timeout: {e}"))
                } else {
                    SendError::Transient(format!("transport: {e}"))
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let message = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SendError::Transient(format!("HTTP {status}: {message}")))
        } else {
            // 401/403/404 and other client errors: retrying cannot help.
            Err(SendError::Terminal(format!("HTTP {status}: {message}")))
        }
    }

    fn limits(&self) -> ChannelLimits {
        self.limits
    }
}
