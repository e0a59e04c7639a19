//! End-to-end pipeline tests over the trait mocks: no network except a local
//! wiremock server for the attachment case, no database, no real webhook.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use noticewire_common::{AnnouncedRecord, Notice, NoticeWireError};

use crate::attachments::{AttachmentProcessor, AttachmentSettings};
use crate::deliver::{Delivery, DeliverySettings};
use crate::fetch::FetchStrategy;
use crate::run::Pipeline;
use crate::sources::NoticeSource;
use crate::store::AnnouncedStore;
use crate::testing::{notice, MemoryStore, MockChannel, MockFetch, MockSource};

fn fast_delivery(channel: Arc<MockChannel>) -> Delivery {
    Delivery::new(
        channel,
        None,
        DeliverySettings {
            chunk_size: 10,
            max_attempts: 4,
            retry_base: Duration::from_millis(1),
            inter_chunk_delay: Duration::ZERO,
        },
    )
}

fn pipeline(
    sources: Vec<Box<dyn NoticeSource>>,
    store: Arc<dyn AnnouncedStore>,
    channel: Arc<MockChannel>,
) -> Pipeline {
    Pipeline::new(
        sources,
        Box::new(MockFetch::new()),
        store,
        AttachmentProcessor::new(AttachmentSettings::default()).unwrap(),
        fast_delivery(channel),
        3,
    )
}

fn fresh(link: &str, title: &str, hours_ago: i64) -> Notice {
    notice(link, title, Utc::now() - TimeDelta::hours(hours_ago))
}

#[tokio::test]
async fn announces_new_notices_oldest_first() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MockChannel::new());

    let sources: Vec<Box<dyn NoticeSource>> = vec![
        Box::new(MockSource::yielding(
            "exam-cell",
            vec![
                fresh("https://e.edu/n/2", "Revaluation schedule", 2),
                fresh("https://e.edu/n/1", "Hall tickets out", 30),
            ],
        )),
        Box::new(MockSource::yielding(
            "registrar",
            vec![fresh("https://e.edu/r/1", "Fee deadline extended", 10)],
        )),
    ];

    let stats = pipeline(sources, store.clone(), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_collected, 3);
    assert_eq!(stats.notices_announced, 3);
    assert_eq!(stats.sources_failed, 0);

    let titles: Vec<String> = channel.sent().iter().map(|a| a.title.clone()).collect();
    assert_eq!(
        titles,
        vec![
            "Hall tickets out",
            "Fee deadline extended",
            "Revaluation schedule"
        ]
    );

    let mut links = store.announced_links();
    links.sort();
    assert_eq!(
        links,
        vec!["https://e.edu/n/1", "https://e.edu/n/2", "https://e.edu/r/1"]
    );
}

#[tokio::test]
async fn already_announced_links_are_skipped() {
    let store = Arc::new(MemoryStore::with_announced(&[
        "https://e.edu/n/1",
        "https://e.edu/n/2",
    ]));
    let channel = Arc::new(MockChannel::new());

    let sources: Vec<Box<dyn NoticeSource>> = vec![Box::new(MockSource::yielding(
        "exam-cell",
        vec![
            fresh("https://e.edu/n/1", "Old news", 2),
            fresh("https://e.edu/n/2", "Also old", 3),
            fresh("https://e.edu/n/3", "Actually new", 1),
        ],
    ))];

    let stats = pipeline(sources, store.clone(), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_duplicate, 2);
    assert_eq!(stats.notices_announced, 1);
    assert_eq!(channel.sent().len(), 1);
    assert_eq!(channel.sent()[0].title, "Actually new");
}

#[tokio::test]
async fn failing_source_does_not_block_the_others() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MockChannel::new());

    let sources: Vec<Box<dyn NoticeSource>> = vec![
        Box::new(MockSource::failing("exam-cell", "HTTP status 503")),
        Box::new(MockSource::yielding(
            "registrar",
            vec![fresh("https://e.edu/r/1", "Survivor", 1)],
        )),
    ];

    let stats = pipeline(sources, store, channel.clone()).run().await.unwrap();

    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.notices_announced, 1);
    assert_eq!(channel.sent()[0].title, "Survivor");
}

#[tokio::test]
async fn stale_notices_never_reach_delivery_or_store() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MockChannel::new());

    let sources: Vec<Box<dyn NoticeSource>> = vec![Box::new(MockSource::yielding(
        "exam-cell",
        vec![
            fresh("https://e.edu/n/1", "Fresh", 1),
            notice(
                "https://e.edu/n/old",
                "From last month",
                Utc::now() - TimeDelta::days(30),
            ),
        ],
    ))];

    let stats = pipeline(sources, store.clone(), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_stale, 1);
    assert_eq!(stats.notices_announced, 1);
    assert_eq!(store.announced_links(), vec!["https://e.edu/n/1"]);
}

#[tokio::test]
async fn same_link_from_two_sources_announced_once() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MockChannel::new());

    let sources: Vec<Box<dyn NoticeSource>> = vec![
        Box::new(MockSource::yielding(
            "exam-cell",
            vec![fresh("https://e.edu/n/1", "Cross-posted", 2)],
        )),
        Box::new(MockSource::yielding(
            "campus-feed",
            vec![fresh("https://e.edu/n/1", "Cross-posted", 2)],
        )),
    ];

    let stats = pipeline(sources, store.clone(), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_collected, 2);
    assert_eq!(stats.notices_announced, 1);
    assert_eq!(channel.sent().len(), 1);
}

#[tokio::test]
async fn failed_delivery_leaves_notice_eligible_for_next_run() {
    let store = Arc::new(MemoryStore::new());
    // Four transient failures against a four-attempt ceiling: exhausted.
    let channel = Arc::new(MockChannel::new().failing_transient(4));

    let sources: Vec<Box<dyn NoticeSource>> = vec![Box::new(MockSource::yielding(
        "exam-cell",
        vec![fresh("https://e.edu/n/1", "Unlucky", 1)],
    ))];

    let stats = pipeline(sources, store.clone(), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_failed, 1);
    assert_eq!(stats.notices_announced, 0);
    assert!(store.announced_links().is_empty());
    assert!(channel.sent().is_empty());

    // Next run, healthy channel, same store: the notice goes out.
    let retry_channel = Arc::new(MockChannel::new());
    let sources: Vec<Box<dyn NoticeSource>> = vec![Box::new(MockSource::yielding(
        "exam-cell",
        vec![fresh("https://e.edu/n/1", "Unlucky", 1)],
    ))];
    let stats = pipeline(sources, store.clone(), retry_channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_announced, 1);
    assert_eq!(store.announced_links(), vec!["https://e.edu/n/1"]);
}

#[tokio::test]
async fn transient_failures_within_ceiling_still_deliver() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MockChannel::new().failing_transient(2));

    let sources: Vec<Box<dyn NoticeSource>> = vec![Box::new(MockSource::yielding(
        "exam-cell",
        vec![fresh("https://e.edu/n/1", "Third time lucky", 1)],
    ))];

    let stats = pipeline(sources, store.clone(), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_announced, 1);
    assert_eq!(channel.sent().len(), 1);
    assert_eq!(store.announced_links(), vec!["https://e.edu/n/1"]);
}

#[tokio::test]
async fn dedup_store_outage_defers_the_notice() {
    struct FailingStore;

    #[async_trait]
    impl AnnouncedStore for FailingStore {
        async fn is_new(&self, _link: &str) -> Result<bool> {
            anyhow::bail!("connection refused")
        }

        async fn record_announced(&self, _record: &AnnouncedRecord) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    let channel = Arc::new(MockChannel::new());
    let sources: Vec<Box<dyn NoticeSource>> = vec![Box::new(MockSource::yielding(
        "exam-cell",
        vec![fresh("https://e.edu/n/1", "Blocked on store", 1)],
    ))];

    let stats = pipeline(sources, Arc::new(FailingStore), channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_failed, 1);
    assert_eq!(stats.notices_announced, 0);
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn overlapping_run_is_rejected() {
    struct SlowSource;

    #[async_trait]
    impl NoticeSource for SlowSource {
        async fn collect(&self, _fetch: &dyn FetchStrategy) -> Result<Vec<Notice>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    let pipeline = Arc::new(pipeline(
        vec![Box::new(SlowSource)],
        Arc::new(MemoryStore::new()),
        Arc::new(MockChannel::new()),
    ));

    let background = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        pipeline.run().await,
        Err(NoticeWireError::RunLockHeld)
    ));

    // The original run is unaffected by the rejected trigger.
    let stats = background.await.unwrap().unwrap();
    assert_eq!(stats.notices_announced, 0);

    // And once it finishes, the lease is free again.
    assert!(pipeline.run().await.is_ok());
}

#[tokio::test]
async fn staged_files_are_gone_after_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/timetable.docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04 timetable".to_vec()))
        .mount(&server)
        .await;

    let mut with_attachment = fresh("https://e.edu/n/1", "Exam timetable", 1);
    with_attachment.attachments = vec![format!("{}/files/timetable.docx", server.uri())];

    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MockChannel::new());
    let sources: Vec<Box<dyn NoticeSource>> =
        vec![Box::new(MockSource::yielding("exam-cell", vec![with_attachment]))];

    let stats = pipeline(sources, store, channel.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.notices_announced, 1);
    assert_eq!(stats.attachments_staged, 1);

    let sent = channel.sent();
    let staged = &sent[0].files[0];
    assert_eq!(staged.display_name, "timetable.docx");
    assert!(
        !staged.path.exists(),
        "run workdir must be removed once the run ends"
    );
}
