//! Attachment staging: capped downloads, PDF rasterization, and size-budget
//! accounting.
//!
//! Everything here degrades instead of failing: an oversized or broken
//! attachment becomes a note in the announcement description, never a dropped
//! notice. All files land in the run's working directory, which the run
//! removes wholesale on every exit path.

pub mod raster;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use noticewire_common::{Notice, SizeBudget, StagedAttachment};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
pub struct AttachmentSettings {
    pub per_file_cap: u64,
    pub per_notice_cap: u64,
    pub max_pdf_pages: u32,
    pub download_timeout: Duration,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            per_file_cap: 8 * 1024 * 1024,
            per_notice_cap: 40 * 1024 * 1024,
            max_pdf_pages: 8,
            download_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error("exceeds per-file cap ({cap} bytes)")]
    TooLarge { cap: u64 },

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Transport(err.to_string())
    }
}

pub struct AttachmentProcessor {
    client: reqwest::Client,
    settings: AttachmentSettings,
}

impl AttachmentProcessor {
    pub fn new(settings: AttachmentSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.download_timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Stage one notice's attachments into `workdir`. Returns the ordered
    /// staged files and a human-readable summary of every omission. Never
    /// fails the notice: the worst case is zero staged files plus notes.
    pub async fn process(&self, notice: &Notice, workdir: &Path) -> (Vec<StagedAttachment>, String) {
        let mut budget = SizeBudget::new(self.settings.per_file_cap, self.settings.per_notice_cap);
        let mut staged: Vec<StagedAttachment> = Vec::new();
        let mut notes: Vec<String> = Vec::new();

        for (idx, url) in notice.attachments.iter().enumerate() {
            let remaining = budget.remaining();
            if remaining == 0 {
                notes.push(omitted_note(notice.attachments.len() - idx));
                break;
            }
            // A file that can never be charged must not be downloaded in
            // full: stream against whichever ceiling is tighter right now.
            let stream_cap = self.settings.per_file_cap.min(remaining);

            let display_name = file_name_from_url(url, idx);
            let dest = workdir.join(format!("{idx:02}-{display_name}"));

            let size = match self.download_capped(url, &dest, stream_cap).await {
                Ok(size) => size,
                Err(DownloadError::TooLarge { cap }) if cap == self.settings.per_file_cap => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    warn!(url, cap, "Attachment over per-file cap, skipping");
                    notes.push(format!("\"{display_name}\" too large to attach"));
                    continue;
                }
                Err(DownloadError::TooLarge { .. }) => {
                    // The notice budget was the binding ceiling, so nothing
                    // further can be charged either. Stop downloading.
                    let _ = tokio::fs::remove_file(&dest).await;
                    warn!(url, "Notice size budget exhausted, stopping");
                    notes.push(omitted_note(notice.attachments.len() - idx));
                    break;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    warn!(url, error = %e, "Attachment download failed, skipping");
                    notes.push(format!("\"{display_name}\" could not be downloaded"));
                    continue;
                }
            };

            if is_pdf(&dest).await {
                let stem = format!("{idx:02}-page");
                let outcome = raster::rasterize(
                    &dest,
                    workdir,
                    &stem,
                    &mut budget,
                    self.settings.max_pdf_pages,
                )
                .await;

                notes.extend(outcome.notes);

                if outcome.pages.is_empty() {
                    // Zero pages converted: ship the original document.
                    if budget.charge(size) {
                        staged.push(StagedAttachment {
                            path: dest,
                            size_bytes: size,
                            display_name,
                        });
                    } else {
                        notes.push(omitted_note(notice.attachments.len() - idx));
                        break;
                    }
                } else {
                    info!(url, pages = outcome.pages.len(), "PDF rasterized");
                    staged.extend(outcome.pages);
                }
                continue;
            }

            if budget.charge(size) {
                staged.push(StagedAttachment {
                    path: dest,
                    size_bytes: size,
                    display_name,
                });
            } else {
                notes.push(omitted_note(notice.attachments.len() - idx));
                break;
            }
        }

        (staged, notes.join("\n"))
    }

    /// Streaming download with `cap` enforced mid-stream. Content-Length is
    /// only a fast reject; it may be absent or wrong, so the byte count
    /// written is what actually enforces the cap.
    async fn download_capped(&self, url: &str, dest: &Path, cap: u64) -> Result<u64, DownloadError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        if let Some(len) = resp.content_length() {
            if len > cap {
                return Err(DownloadError::TooLarge { cap });
            }
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if written + chunk.len() as u64 > cap {
                return Err(DownloadError::TooLarge { cap });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::Transport(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        Ok(written)
    }
}

/// PDF detection by magic bytes. URLs and extensions lie.
async fn is_pdf(path: &Path) -> bool {
    use tokio::io::AsyncReadExt;
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut magic = [0u8; 5];
    matches!(file.read_exact(&mut magic).await, Ok(_)) && magic == *PDF_MAGIC
}

fn omitted_note(count: usize) -> String {
    format!("{count} attachment(s) omitted: size budget reached")
}

/// Last path segment of the URL, or a positional fallback.
fn file_name_from_url(url: &str, idx: usize) -> String {
    let name = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim();
    if name.is_empty() || !name.contains('.') {
        format!("attachment-{}", idx + 1)
    } else {
        name.to_string()
    }
}
