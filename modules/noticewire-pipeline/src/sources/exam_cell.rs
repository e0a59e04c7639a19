//! Exam cell notice board: a date/title table where each row links to a
//! detail page carrying the actual attachment links.

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::warn;

use noticewire_common::Notice;

use crate::fetch::FetchStrategy;
use crate::sources::{looks_like_document, parse_notice_date, resolve_link, NoticeSource};

/// Attachment links harvested per detail page, after dedup.
const MAX_ATTACHMENTS_PER_NOTICE: usize = 10;

pub struct ExamCellSource {
    listing_url: String,
}

struct ListingRow {
    title: String,
    link: String,
    date: chrono::DateTime<chrono::Utc>,
}

impl ExamCellSource {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
        }
    }
}

#[async_trait]
impl NoticeSource for ExamCellSource {
    async fn collect(&self, fetch: &dyn FetchStrategy) -> Result<Vec<Notice>> {
        let html = fetch
            .fetch(&self.listing_url)
            .await
            .with_context(|| format!("Failed to fetch listing {}", self.listing_url))?;

        // Parsed DOM is dropped before the detail fetches: scraper documents
        // are not Send and must not be held across an await.
        let rows = parse_listing(&html, &self.listing_url);

        let mut notices = Vec::with_capacity(rows.len());
        for row in rows {
            // Detail fetches are independent: one failing yields a notice
            // without attachments, never a dropped sibling.
            let attachments = match fetch.fetch(&row.link).await {
                Ok(detail) => attachment_links(&detail, &row.link),
                Err(e) => {
                    warn!(
                        source = self.name(),
                        link = row.link.as_str(),
                        error = %e,
                        "Detail page fetch failed, announcing without attachments"
                    );
                    Vec::new()
                }
            };

            notices.push(Notice {
                id: None,
                title: row.title,
                link: row.link,
                date: row.date,
                source: self.name().to_string(),
                attachments,
            });
        }

        Ok(notices)
    }

    fn name(&self) -> &str {
        "exam_cell"
    }
}

/// Parse the listing table. Rows missing a date, title, or link are skipped
/// with a log line; the rest of the table still parses.
fn parse_listing(html: &str, base_url: &str) -> Vec<ListingRow> {
    let document = Html::parse_document(html);
    let row_sel = Selector::parse("table tr").expect("valid selector");
    let cell_sel = Selector::parse("td").expect("valid selector");
    let anchor_sel = Selector::parse("a[href]").expect("valid selector");

    let mut rows = Vec::new();
    for tr in document.select(&row_sel) {
        let cells: Vec<_> = tr.select(&cell_sel).collect();
        if cells.len() < 2 {
            continue; // header or separator row
        }

        let date_text: String = cells[0].text().collect::<String>();
        let Some(date) = parse_notice_date(&date_text) else {
            warn!(row = date_text.trim(), "Skipping row with unparsable date");
            continue;
        };

        let Some(anchor) = cells[1].select(&anchor_sel).next() else {
            warn!("Skipping row without a notice link");
            continue;
        };
        let title: String = anchor.text().collect::<String>().trim().to_string();
        let Some(link) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_link(base_url, href))
        else {
            warn!(title = title.as_str(), "Skipping row with unresolvable link");
            continue;
        };
        if title.is_empty() {
            warn!(link = link.as_str(), "Skipping row with empty title");
            continue;
        }

        rows.push(ListingRow { title, link, date });
    }
    rows
}

/// Pull document links out of a detail page, in document order, deduplicated.
pub(crate) fn attachment_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchor_sel = Selector::parse("a[href]").expect("valid selector");

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(resolved) = resolve_link(base_url, href) else {
            continue;
        };
        if looks_like_document(&resolved) && seen.insert(resolved.clone()) {
            links.push(resolved);
            if links.len() >= MAX_ATTACHMENTS_PER_NOTICE {
                break;
            }
        }
    }
    links
}
