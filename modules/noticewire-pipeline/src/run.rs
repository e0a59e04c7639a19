//! One pipeline run: collect → freshness filter → per-notice dedup, staging,
//! delivery, recording → cleanup.
//!
//! An external timer triggers runs; the pipeline itself never schedules. An
//! in-process lease rejects overlapping triggers outright, because the temp
//! directory and the size budget are scoped to a single run and a second run
//! racing on them would corrupt both. Notices are processed sequentially for
//! the same reason.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};

use noticewire_common::{AnnouncedRecord, NoticeWireError};

use crate::attachments::AttachmentProcessor;
use crate::deliver::Delivery;
use crate::fetch::FetchStrategy;
use crate::sources::{collect_all, NoticeSource};
use crate::store::AnnouncedStore;

/// Stats from a pipeline run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub sources_failed: u32,
    pub notices_collected: u32,
    pub notices_stale: u32,
    pub notices_duplicate: u32,
    pub notices_announced: u32,
    pub notices_failed: u32,
    pub attachments_staged: u32,
    pub attachment_bytes: u64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ===")?;
        writeln!(f, "Sources failed:      {}", self.sources_failed)?;
        writeln!(f, "Notices collected:   {}", self.notices_collected)?;
        writeln!(f, "Notices stale:       {}", self.notices_stale)?;
        writeln!(f, "Notices duplicate:   {}", self.notices_duplicate)?;
        writeln!(f, "Notices announced:   {}", self.notices_announced)?;
        writeln!(f, "Notices failed:      {}", self.notices_failed)?;
        writeln!(f, "Attachments staged:  {}", self.attachments_staged)?;
        writeln!(f, "Attachment bytes:    {}", self.attachment_bytes)?;
        Ok(())
    }
}

pub struct Pipeline {
    sources: Vec<Box<dyn NoticeSource>>,
    fetch: Box<dyn FetchStrategy>,
    store: Arc<dyn AnnouncedStore>,
    processor: AttachmentProcessor,
    delivery: Delivery,
    max_notice_age_days: i64,
    running: AtomicBool,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Box<dyn NoticeSource>>,
        fetch: Box<dyn FetchStrategy>,
        store: Arc<dyn AnnouncedStore>,
        processor: AttachmentProcessor,
        delivery: Delivery,
        max_notice_age_days: i64,
    ) -> Self {
        Self {
            sources,
            fetch,
            store,
            processor,
            delivery,
            max_notice_age_days,
            running: AtomicBool::new(false),
        }
    }

    /// Run one full pipeline pass. A second call while one is in flight gets
    /// `RunLockHeld` and does nothing.
    pub async fn run(&self) -> Result<RunStats, NoticeWireError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NoticeWireError::RunLockHeld);
        }

        let result = self.run_inner().await;

        // Always release the lease, and escalate critical failures. The run
        // temp dir is owned inside run_inner, so cleanup has already happened
        // on every path by now.
        if let Err(ref e) = result {
            error!(error = %e, "Pipeline run failed");
            self.delivery.escalate("Pipeline run failed", &e.to_string()).await;
        }
        self.running.store(false, Ordering::Release);

        result.map_err(NoticeWireError::from)
    }

    async fn run_inner(&self) -> anyhow::Result<RunStats> {
        let mut stats = RunStats::default();
        let now = Utc::now();

        // Owned by the run: dropped (and recursively removed) on every exit
        // path, including errors propagated with `?` below.
        let workdir = tempfile::Builder::new()
            .prefix("noticewire-run-")
            .tempdir()
            .context("Failed to create run temp dir")?;

        let (collected, sources_failed) = collect_all(&self.sources, self.fetch.as_ref()).await;
        stats.sources_failed = sources_failed;
        stats.notices_collected = collected.len() as u32;

        // Freshness window, then oldest-first so announcements read in order.
        // Two sources carrying the same link count as one notice.
        let mut seen = HashSet::new();
        let mut fresh: Vec<_> = collected
            .into_iter()
            .filter(|n| {
                if n.age_days(now) > self.max_notice_age_days {
                    stats.notices_stale += 1;
                    return false;
                }
                seen.insert(n.link.clone())
            })
            .collect();
        fresh.sort_by_key(|n| n.date);

        info!(
            fresh = fresh.len(),
            stale = stats.notices_stale,
            "Notices after freshness filter"
        );

        for notice in fresh {
            match self.store.is_new(&notice.link).await {
                Ok(true) => {}
                Ok(false) => {
                    stats.notices_duplicate += 1;
                    continue;
                }
                Err(e) => {
                    // Announcing without a working dedup check risks spamming
                    // duplicates, so the notice waits for the next run.
                    warn!(link = notice.link.as_str(), error = %e, "Dedup check failed, deferring notice");
                    stats.notices_failed += 1;
                    continue;
                }
            }

            let (staged, description) = self.processor.process(&notice, workdir.path()).await;
            stats.attachments_staged += staged.len() as u32;
            stats.attachment_bytes += staged.iter().map(|s| s.size_bytes).sum::<u64>();

            match self.delivery.deliver(&notice, &staged, &description).await {
                Ok(()) => {
                    let record = AnnouncedRecord::from_notice(&notice, Utc::now());
                    if let Err(e) = self.store.record_announced(&record).await {
                        // Delivered but unrecorded: the next run may
                        // re-announce this link. Documented duplicate window.
                        warn!(link = notice.link.as_str(), error = %e, "Failed to record announcement");
                    }
                    stats.notices_announced += 1;
                }
                Err(e) => {
                    warn!(link = notice.link.as_str(), error = %e, "Delivery failed, notice stays eligible");
                    stats.notices_failed += 1;
                }
            }
        }

        info!("{stats}");
        Ok(stats)
    }
}
