//! Campus news feed: RSS/Atom rather than scraped HTML. Entries with
//! enclosures (or links that point straight at documents) carry those as
//! attachments.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use noticewire_common::Notice;

use crate::fetch::FetchStrategy;
use crate::sources::{looks_like_document, NoticeSource};

pub struct CampusFeedSource {
    feed_url: String,
}

impl CampusFeedSource {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
        }
    }
}

#[async_trait]
impl NoticeSource for CampusFeedSource {
    async fn collect(&self, fetch: &dyn FetchStrategy) -> Result<Vec<Notice>> {
        let body = fetch
            .fetch(&self.feed_url)
            .await
            .with_context(|| format!("Failed to fetch feed {}", self.feed_url))?;

        let feed = feed_rs::parser::parse(body.as_bytes())
            .with_context(|| format!("Failed to parse feed {}", self.feed_url))?;

        let mut notices = Vec::new();
        for entry in feed.entries {
            let Some(title) = entry.title.as_ref().map(|t| t.content.trim().to_string()) else {
                warn!(source = self.name(), "Skipping feed entry without title");
                continue;
            };

            // Prefer the alternate link; fall back to the first link at all.
            let Some(link) = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone())
            else {
                warn!(source = self.name(), title = title.as_str(), "Skipping feed entry without link");
                continue;
            };

            let Some(date) = entry.published.or(entry.updated) else {
                warn!(source = self.name(), title = title.as_str(), "Skipping feed entry without date");
                continue;
            };

            // An enclosure and a media:content element often carry the same
            // URL, so dedup across both, preserving first-seen order.
            let mut seen = HashSet::new();
            let mut attachments: Vec<String> = Vec::new();
            for link in &entry.links {
                if (link.rel.as_deref() == Some("enclosure") || looks_like_document(&link.href))
                    && seen.insert(link.href.clone())
                {
                    attachments.push(link.href.clone());
                }
            }
            for media in &entry.media {
                for content in &media.content {
                    if let Some(url) = &content.url {
                        let href = url.to_string();
                        if seen.insert(href.clone()) {
                            attachments.push(href);
                        }
                    }
                }
            }

            notices.push(Notice {
                id: Some(entry.id),
                title,
                link,
                date,
                source: self.name().to_string(),
                attachments,
            });
        }

        Ok(notices)
    }

    fn name(&self) -> &str {
        "campus_feed"
    }
}
