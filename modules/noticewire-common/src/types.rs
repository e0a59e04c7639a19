use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One external announcement record. `link` is the sole identity: two notices
/// with the same link are the same real-world announcement regardless of
/// title drift. A raw record whose date cannot be parsed never becomes a
/// Notice; it is dropped at extraction time, not retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub link: String,
    pub date: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl Notice {
    /// Age relative to `now`, in whole days. Negative ages (future-dated
    /// notices) clamp to zero so they always pass the freshness filter.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.date).num_days().max(0)
    }
}

/// Append-only persisted record of a successfully delivered notice.
/// Existence of a row for a link is the dedup predicate; rows are never
/// updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncedRecord {
    pub link: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub announced_at: DateTime<Utc>,
}

impl AnnouncedRecord {
    pub fn from_notice(notice: &Notice, announced_at: DateTime<Utc>) -> Self {
        Self {
            link: notice.link.clone(),
            title: notice.title.clone(),
            date: notice.date,
            announced_at,
        }
    }
}

/// A downloaded or derived (rasterized) file staged for delivery. Lives under
/// the run's working directory, so it never outlives the run regardless of
/// how the notice's processing pass exits.
#[derive(Debug, Clone)]
pub struct StagedAttachment {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub display_name: String,
}

/// Running byte counter for one notice's staged attachments, checked against
/// the per-file and per-notice ceilings. Charged only by the attachment
/// processor; the delivery stage reads staged sizes to place chunk boundaries.
#[derive(Debug, Clone, Copy)]
pub struct SizeBudget {
    pub per_file_cap: u64,
    pub per_notice_cap: u64,
    used: u64,
}

impl SizeBudget {
    pub fn new(per_file_cap: u64, per_notice_cap: u64) -> Self {
        Self {
            per_file_cap,
            per_notice_cap,
            used: 0,
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.per_notice_cap.saturating_sub(self.used)
    }

    /// Whether a file of `size` bytes fits under both ceilings right now.
    pub fn fits(&self, size: u64) -> bool {
        size <= self.per_file_cap && self.used + size <= self.per_notice_cap
    }

    /// Charge `size` bytes. Returns false (and charges nothing) if it would
    /// overflow either ceiling.
    pub fn charge(&mut self, size: u64) -> bool {
        if !self.fits(size) {
            return false;
        }
        self.used += size;
        true
    }
}
