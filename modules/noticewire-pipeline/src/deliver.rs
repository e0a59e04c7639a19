//! Chunked, retried delivery to the notification channel.
//!
//! One notice becomes one announcement send plus zero or more continuation
//! sends for attachment overflow. Transient send errors retry with
//! exponential backoff up to a fixed attempt ceiling; terminal errors (and
//! exhausted retries) fail the whole delivery so the notice stays unrecorded
//! and eligible for the next run, with an admin alert when configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use noticewire_common::{Notice, StagedAttachment};

#[derive(Debug, Clone)]
pub struct Announcement {
    pub title: String,
    pub url: String,
    pub description: String,
    pub footer: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<StagedAttachment>,
}

/// Per-call ceilings of the underlying channel, read as configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChannelLimits {
    pub max_files_per_send: usize,
    pub max_bytes_per_send: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Timeout, rate limit, server error. Worth retrying.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// Permission denial and the like. Retrying cannot help.
    #[error("terminal send failure: {0}")]
    Terminal(String),
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, announcement: &Announcement) -> Result<(), SendError>;
    fn limits(&self) -> ChannelLimits;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("retries exhausted on chunk {chunk} after {attempts} attempts: {last}")]
    Exhausted {
        chunk: usize,
        attempts: u32,
        last: String,
    },

    #[error("terminal channel error on chunk {chunk}: {message}")]
    Terminal { chunk: usize, message: String },
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub inter_chunk_delay: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_attempts: 4,
            retry_base: Duration::from_secs(2),
            inter_chunk_delay: Duration::from_millis(1500),
        }
    }
}

pub struct Delivery {
    channel: Arc<dyn NotificationChannel>,
    admin: Option<Arc<dyn NotificationChannel>>,
    settings: DeliverySettings,
}

impl Delivery {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        admin: Option<Arc<dyn NotificationChannel>>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            channel,
            admin,
            settings,
        }
    }

    /// Send one notice and its staged attachments. Partial success is not a
    /// thing here: any chunk failing terminally (or exhausting retries) fails
    /// the whole delivery so dedup recording never happens.
    pub async fn deliver(
        &self,
        notice: &Notice,
        attachments: &[StagedAttachment],
        description: &str,
    ) -> Result<(), DeliveryError> {
        let limits = self.channel.limits();
        let chunks = chunk_files(attachments, self.settings.chunk_size, &limits);
        let total = chunks.len().max(1);

        // First send carries the announcement body (and the first chunk, if
        // there are attachments at all).
        let first_files = chunks.first().cloned().unwrap_or_default();
        let announcement = Announcement {
            title: notice.title.clone(),
            url: notice.link.clone(),
            description: description.to_string(),
            footer: notice.source.clone(),
            timestamp: notice.date,
            files: first_files,
        };
        self.send_with_retry(&announcement, 0).await?;

        // Continuation sends for the remaining chunks.
        for (idx, chunk) in chunks.iter().enumerate().skip(1) {
            tokio::time::sleep(self.settings.inter_chunk_delay).await;

            let continuation = Announcement {
                title: format!(
                    "{} — additional attachments {}/{}",
                    notice.title,
                    idx + 1,
                    total
                ),
                url: notice.link.clone(),
                description: String::new(),
                footer: notice.source.clone(),
                timestamp: notice.date,
                files: chunk.clone(),
            };
            self.send_with_retry(&continuation, idx).await?;
        }

        info!(
            link = notice.link.as_str(),
            chunks = total,
            files = attachments.len(),
            "Notice delivered"
        );
        Ok(())
    }

    async fn send_with_retry(
        &self,
        announcement: &Announcement,
        chunk: usize,
    ) -> Result<(), DeliveryError> {
        let mut last = String::new();

        for attempt in 0..self.settings.max_attempts {
            if attempt > 0 {
                let backoff = self.settings.retry_base * 2u32.pow(attempt - 1);
                let jitter = Duration::from_millis(rand::rng().random_range(0..500));
                tokio::time::sleep(backoff + jitter).await;
            }

            match self.channel.send(announcement).await {
                Ok(()) => return Ok(()),
                Err(SendError::Terminal(message)) => {
                    warn!(chunk, error = message.as_str(), "Terminal send failure");
                    self.escalate(&announcement.title, &message).await;
                    return Err(DeliveryError::Terminal { chunk, message });
                }
                Err(SendError::Transient(message)) => {
                    warn!(
                        chunk,
                        attempt = attempt + 1,
                        error = message.as_str(),
                        "Transient send failure, will retry"
                    );
                    last = message;
                }
            }
        }

        self.escalate(&announcement.title, &last).await;
        Err(DeliveryError::Exhausted {
            chunk,
            attempts: self.settings.max_attempts,
            last,
        })
    }

    /// Best-effort admin alert. Failure to alert is logged, never propagated.
    pub async fn escalate(&self, title: &str, reason: &str) {
        let Some(ref admin) = self.admin else {
            return;
        };
        let alert = Announcement {
            title: "Delivery failure".to_string(),
            url: String::new(),
            description: format!("Failed to announce \"{title}\": {reason}"),
            footer: "noticewire".to_string(),
            timestamp: Utc::now(),
            files: Vec::new(),
        };
        if let Err(e) = admin.send(&alert).await {
            warn!(error = %e, "Admin alert failed");
        }
    }
}

/// Partition staged files into chunks respecting both the configured chunk
/// size (capped by the channel's per-call file limit) and the channel's
/// per-call byte ceiling. A single file over the byte ceiling gets its own
/// chunk; the channel will reject it and that is the right failure to see.
pub fn chunk_files(
    files: &[StagedAttachment],
    chunk_size: usize,
    limits: &ChannelLimits,
) -> Vec<Vec<StagedAttachment>> {
    let per_chunk = chunk_size.min(limits.max_files_per_send).max(1);

    let mut chunks: Vec<Vec<StagedAttachment>> = Vec::new();
    let mut current: Vec<StagedAttachment> = Vec::new();
    let mut current_bytes: u64 = 0;

    for file in files {
        let over_count = current.len() >= per_chunk;
        let over_bytes =
            !current.is_empty() && current_bytes + file.size_bytes > limits.max_bytes_per_send;
        if over_count || over_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += file.size_bytes;
        current.push(file.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{notice, test_now, MockChannel};

    fn staged(n: usize, size: u64) -> Vec<StagedAttachment> {
        (0..n)
            .map(|i| StagedAttachment {
                path: std::path::PathBuf::from(format!("/tmp/run/file-{i}.png")),
                size_bytes: size,
                display_name: format!("file-{i}.png"),
            })
            .collect()
    }

    fn fast_settings() -> DeliverySettings {
        DeliverySettings {
            chunk_size: 10,
            max_attempts: 4,
            retry_base: Duration::from_millis(5),
            inter_chunk_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn chunking_respects_count_limit() {
        let limits = ChannelLimits {
            max_files_per_send: 10,
            max_bytes_per_send: u64::MAX,
        };
        let chunks = chunk_files(&staged(23, 100), 10, &limits);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 3]);
    }

    #[test]
    fn chunking_respects_byte_ceiling() {
        let limits = ChannelLimits {
            max_files_per_send: 10,
            max_bytes_per_send: 250,
        };
        // 100 bytes each: only two fit under 250 per call.
        let chunks = chunk_files(&staged(5, 100), 10, &limits);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn channel_file_limit_caps_configured_chunk_size() {
        let limits = ChannelLimits {
            max_files_per_send: 4,
            max_bytes_per_send: u64::MAX,
        };
        let chunks = chunk_files(&staged(8, 1), 10, &limits);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4]);
    }

    #[tokio::test]
    async fn no_attachments_means_exactly_one_send() {
        let channel = std::sync::Arc::new(MockChannel::new());
        let delivery = Delivery::new(channel.clone(), None, fast_settings());

        let n = notice("http://x.edu/n/1", "Exam Routine", test_now());
        delivery.deliver(&n, &[], "").await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Exam Routine");
        assert!(sent[0].files.is_empty());
    }

    #[tokio::test]
    async fn continuations_are_labeled() {
        let channel = std::sync::Arc::new(MockChannel::new());
        let delivery = Delivery::new(channel.clone(), None, fast_settings());

        let n = notice("http://x.edu/n/1", "Seat Plan", test_now());
        delivery.deliver(&n, &staged(23, 1), "").await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].title, "Seat Plan");
        assert_eq!(sent[0].files.len(), 10);
        assert!(sent[1].title.contains("additional attachments 2/3"));
        assert!(sent[2].title.contains("additional attachments 3/3"));
        assert_eq!(sent[2].files.len(), 3);
    }

    #[tokio::test]
    async fn delivery_honors_channel_byte_ceiling() {
        let channel = std::sync::Arc::new(MockChannel::new().with_limits(ChannelLimits {
            max_files_per_send: 10,
            max_bytes_per_send: 250,
        }));
        let delivery = Delivery::new(channel.clone(), None, fast_settings());

        // 100 bytes each against a 250-byte call ceiling: two per send.
        let n = notice("http://x.edu/n/1", "Seat Plan", test_now());
        delivery.deliver(&n, &staged(5, 100), "").await.unwrap();

        let sent = channel.sent();
        assert_eq!(
            sent.iter().map(|a| a.files.len()).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
    }

    #[tokio::test]
    async fn transient_failures_under_ceiling_still_deliver() {
        // 3 failures then success fits inside 4 attempts.
        let channel = std::sync::Arc::new(MockChannel::new().failing_transient(3));
        let delivery = Delivery::new(channel.clone(), None, fast_settings());

        let n = notice("http://x.edu/n/1", "Exam Routine", test_now());
        delivery.deliver(&n, &[], "").await.unwrap();
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_and_escalate() {
        let channel = std::sync::Arc::new(MockChannel::new().failing_transient(4));
        let admin = std::sync::Arc::new(MockChannel::new());
        let delivery = Delivery::new(channel.clone(), Some(admin.clone()), fast_settings());

        let n = notice("http://x.edu/n/1", "Exam Routine", test_now());
        let err = delivery.deliver(&n, &[], "").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Exhausted { attempts: 4, .. }));
        assert!(channel.sent().is_empty());
        let alerts = admin.sent();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].description.contains("Exam Routine"));
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let channel = std::sync::Arc::new(MockChannel::new().failing_terminal(1));
        let delivery = Delivery::new(channel.clone(), None, fast_settings());

        let n = notice("http://x.edu/n/1", "Exam Routine", test_now());
        let err = delivery.deliver(&n, &[], "").await.unwrap_err();

        // One terminal failure, zero successful sends: no retries happened.
        assert!(matches!(err, DeliveryError::Terminal { .. }));
        assert!(channel.sent().is_empty());
    }
}
