//! Registrar notice board: a flat list where each item carries its date in
//! the row text and links attachments inline. No detail page, so one fetch
//! covers the whole source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;

use noticewire_common::Notice;

use crate::fetch::FetchStrategy;
use crate::sources::{looks_like_document, parse_notice_date, resolve_link, NoticeSource};

pub struct RegistrarSource {
    listing_url: String,
}

impl RegistrarSource {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
        }
    }
}

#[async_trait]
impl NoticeSource for RegistrarSource {
    async fn collect(&self, fetch: &dyn FetchStrategy) -> Result<Vec<Notice>> {
        let html = fetch
            .fetch(&self.listing_url)
            .await
            .with_context(|| format!("Failed to fetch listing {}", self.listing_url))?;

        Ok(parse_items(&html, &self.listing_url, self.name()))
    }

    fn name(&self) -> &str {
        "registrar"
    }
}

fn parse_items(html: &str, base_url: &str, source: &str) -> Vec<Notice> {
    // Dates appear free-form inside the item text, e.g. "Published: 01/05/2024".
    let date_re = Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}[/-]\d{1,2}[/-]\d{4})\b")
        .expect("valid regex");

    let document = Html::parse_document(html);
    let item_sel = Selector::parse("ul.notices li, ol.notices li").expect("valid selector");
    let anchor_sel = Selector::parse("a[href]").expect("valid selector");

    let mut notices = Vec::new();
    for item in document.select(&item_sel) {
        let text: String = item.text().collect::<String>();
        let Some(date) = date_re
            .find(&text)
            .and_then(|m| parse_notice_date(m.as_str()))
        else {
            warn!(item = text.trim(), "Skipping item with no parseable date");
            continue;
        };

        // First non-document anchor is the notice itself; document anchors
        // are its attachments.
        let mut title = String::new();
        let mut link = None;
        let mut attachments = Vec::new();
        for anchor in item.select(&anchor_sel) {
            let Some(resolved) = anchor
                .value()
                .attr("href")
                .and_then(|href| resolve_link(base_url, href))
            else {
                continue;
            };
            if looks_like_document(&resolved) {
                if !attachments.contains(&resolved) {
                    attachments.push(resolved);
                }
            } else if link.is_none() {
                title = anchor.text().collect::<String>().trim().to_string();
                link = Some(resolved);
            }
        }

        // Attachment-only items: the first document doubles as the notice link.
        if link.is_none() {
            if let Some(first) = attachments.first().cloned() {
                title = item
                    .select(&anchor_sel)
                    .next()
                    .map(|a| a.text().collect::<String>().trim().to_string())
                    .unwrap_or_default();
                link = Some(first);
            }
        }

        let (Some(link), false) = (link, title.is_empty()) else {
            warn!(item = text.trim(), "Skipping item missing title or link");
            continue;
        };

        notices.push(Notice {
            id: None,
            title,
            link,
            date,
            source: source.to_string(),
            attachments,
        });
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const LISTING: &str = r#"
        <ul class="notices">
          <li>
            01/05/2024 — <a href="/n/semester-fees">Semester Fee Deadline</a>
            <a href="/files/fees.pdf">fee schedule</a>
          </li>
          <li>Published whenever — <a href="/n/undated">Undated Item</a></li>
          <li>02/05/2024 — <a href="/files/holiday.pdf">Holiday Notification</a></li>
        </ul>
    "#;

    #[test]
    fn extracts_items_with_inline_attachments() {
        let notices = parse_items(LISTING, "http://www.x.edu/registrar/", "registrar");
        assert_eq!(notices.len(), 2);

        assert_eq!(notices[0].title, "Semester Fee Deadline");
        assert_eq!(notices[0].link, "http://www.x.edu/n/semester-fees");
        assert_eq!(notices[0].attachments, vec!["http://www.x.edu/files/fees.pdf"]);
        assert_eq!(notices[0].date.day(), 1);
        assert_eq!(notices[0].date.month(), 5);
    }

    #[test]
    fn attachment_only_item_uses_document_as_link() {
        let notices = parse_items(LISTING, "http://www.x.edu/registrar/", "registrar");
        assert_eq!(notices[1].title, "Holiday Notification");
        assert_eq!(notices[1].link, "http://www.x.edu/files/holiday.pdf");
        assert_eq!(notices[1].attachments, vec!["http://www.x.edu/files/holiday.pdf"]);
    }
}
