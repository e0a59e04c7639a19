//! Per-site notice extractors.
//!
//! Each source parses one site's structure into zero or more normalized
//! `Notice` records. Extraction is best-effort: a row missing title, link, or
//! a parseable date is logged and skipped; a failing detail-page fetch drops
//! that notice's attachments, not the notice or its siblings. Sources run
//! concurrently and are joined with all-settled semantics: one source
//! failing contributes an empty result and never cancels the others.

pub mod campus_feed;
pub mod exam_cell;
pub mod registrar;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{info, warn};

use noticewire_common::Notice;

use crate::fetch::FetchStrategy;

pub use campus_feed::CampusFeedSource;
pub use exam_cell::ExamCellSource;
pub use registrar::RegistrarSource;

#[async_trait]
pub trait NoticeSource: Send + Sync {
    /// Fetch and parse this site's notice listing.
    async fn collect(&self, fetch: &dyn FetchStrategy) -> Result<Vec<Notice>>;
    fn name(&self) -> &str;
}

/// Run all sources concurrently. A source failure is logged and yields an
/// empty contribution. Returns the merged notices and the failed-source count.
pub async fn collect_all(
    sources: &[Box<dyn NoticeSource>],
    fetch: &dyn FetchStrategy,
) -> (Vec<Notice>, u32) {
    let results = futures::future::join_all(
        sources
            .iter()
            .map(|source| async move { (source.name().to_string(), source.collect(fetch).await) }),
    )
    .await;

    let mut notices = Vec::new();
    let mut failed = 0u32;
    for (name, result) in results {
        match result {
            Ok(batch) => {
                info!(source = name.as_str(), notices = batch.len(), "Source collected");
                notices.extend(batch);
            }
            Err(e) => {
                warn!(source = name.as_str(), error = %e, "Source failed, continuing without it");
                failed += 1;
            }
        }
    }
    (notices, failed)
}

/// Date formats seen across notice boards, tried in order. All are read as
/// dates (no time component) and pinned to midnight UTC.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Parse a notice date string. Returns None for anything unparsable; callers
/// drop the row (such records are invalid, never retried).
pub fn parse_notice_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&midnight));
        }
    }
    None
}

/// File extensions worth staging as attachments.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".jpg", ".jpeg", ".png", ".zip",
];

/// Whether a URL points at a downloadable document rather than another page.
pub fn looks_like_document(url: &str) -> bool {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    DOCUMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Resolve a possibly-relative href against the page it appeared on.
pub fn resolve_link(base_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base_url).ok()?.join(href).ok().map(|u| u.to_string())
}
