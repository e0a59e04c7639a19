// Test mocks for the pipeline, one per trait boundary:
// - MockFetch (FetchStrategy): HashMap-based URL→body
// - MockSource (NoticeSource): fixed notices or a scripted failure
// - MemoryStore (AnnouncedStore): in-memory announced set
// - MockChannel (NotificationChannel): scripted results, recorded sends
//
// No network, no database: `cargo test` runs in seconds.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use noticewire_common::{AnnouncedRecord, Notice};

use crate::deliver::{Announcement, ChannelLimits, NotificationChannel, SendError};
use crate::fetch::{FetchError, FetchStrategy};
use crate::sources::NoticeSource;
use crate::store::AnnouncedStore;

/// A fixed "now" for deterministic freshness tests: 2024-05-10 12:00 UTC.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

/// Notice builder with sane defaults for tests.
pub fn notice(link: &str, title: &str, date: DateTime<Utc>) -> Notice {
    Notice {
        id: None,
        title: title.to_string(),
        link: link.to_string(),
        date,
        source: "test".to_string(),
        attachments: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// MockFetch
// ---------------------------------------------------------------------------

/// URL→body fetch strategy. Unregistered URLs fail with a transport error.
pub struct MockFetch {
    bodies: HashMap<String, String>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
        }
    }

    pub fn on(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }
}

impl Default for MockFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchStrategy for MockFetch {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Transport(format!("MockFetch: no body registered for {url}")))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

pub struct MockSource {
    name: String,
    result: Mutex<Option<Result<Vec<Notice>>>>,
}

impl MockSource {
    pub fn yielding(name: &str, notices: Vec<Notice>) -> Self {
        Self {
            name: name.to_string(),
            result: Mutex::new(Some(Ok(notices))),
        }
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            result: Mutex::new(Some(Err(anyhow::anyhow!(message.to_string())))),
        }
    }
}

#[async_trait]
impl NoticeSource for MockSource {
    async fn collect(&self, _fetch: &dyn FetchStrategy) -> Result<Vec<Notice>> {
        self.result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory announced store. Records are append-only, matching the real
/// store's idempotent insert.
pub struct MemoryStore {
    records: Mutex<Vec<AnnouncedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_announced(links: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut records = store.records.lock().unwrap();
            for link in links {
                records.push(AnnouncedRecord {
                    link: link.to_string(),
                    title: String::new(),
                    date: test_now(),
                    announced_at: test_now(),
                });
            }
        }
        store
    }

    pub fn announced_links(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.link.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnnouncedStore for MemoryStore {
    async fn is_new(&self, link: &str) -> Result<bool> {
        Ok(!self.records.lock().unwrap().iter().any(|r| r.link == link))
    }

    async fn record_announced(&self, record: &AnnouncedRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if !records.iter().any(|r| r.link == record.link) {
            records.push(record.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockChannel
// ---------------------------------------------------------------------------

/// Notification channel with a scripted failure prefix: the first
/// `fail_count` sends fail with the given error kind, everything after
/// succeeds. Every attempted send is recorded.
pub struct MockChannel {
    limits: ChannelLimits,
    fail_count: Mutex<u32>,
    terminal: bool,
    sent: Mutex<Vec<Announcement>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            limits: ChannelLimits {
                max_files_per_send: 10,
                max_bytes_per_send: 25 * 1024 * 1024,
            },
            fail_count: Mutex::new(0),
            terminal: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_limits(mut self, limits: ChannelLimits) -> Self {
        self.limits = limits;
        self
    }

    /// First `n` sends fail transiently.
    pub fn failing_transient(self, n: u32) -> Self {
        *self.fail_count.lock().unwrap() = n;
        self
    }

    /// First `n` sends fail terminally.
    pub fn failing_terminal(mut self, n: u32) -> Self {
        *self.fail_count.lock().unwrap() = n;
        self.terminal = true;
        self
    }

    /// Successfully delivered announcements (failed attempts excluded).
    pub fn sent(&self) -> Vec<Announcement> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    async fn send(&self, announcement: &Announcement) -> Result<(), SendError> {
        let mut remaining = self.fail_count.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return if self.terminal {
                Err(SendError::Terminal("missing permissions".to_string()))
            } else {
                Err(SendError::Transient("rate limited".to_string()))
            };
        }
        drop(remaining);

        self.sent.lock().unwrap().push(announcement.clone());
        Ok(())
    }

    fn limits(&self) -> ChannelLimits {
        self.limits
    }
}
