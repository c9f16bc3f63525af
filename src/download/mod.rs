//! Attachment downloader.
//!
//! Walks every scraped body, collects the attachment anchors, and fetches
//! each one at most once per `(url, timestamp)`. Titles that end in a
//! ` - YYYY-MM-DD HH:MM:SS` suffix carry the attachment's own timestamp;
//! it replaces the scrape timestamp so a re-uploaded file with the same URL
//! is fetched again.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::fetcher::Fetcher;
use crate::repository::download::Attachment;
use crate::repository::scrape::iter_bodies;
use crate::repository::SessionContext;

const ATTACHMENT_ANCHOR: &str = "div.inlineaf-description > a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadingEntry {
    pub title: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl DownloadingEntry {
    /// Normalize an anchor into a downloading entry: the query string is
    /// dropped from the URL, and a trailing timestamp in the title both
    /// cleans the title and overrides the scrape timestamp.
    fn create(url: &str, title: &str, timestamp: DateTime<Utc>) -> DownloadingEntry {
        let url = match Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_query(None);
                parsed.to_string()
            }
            Err(_) => url.to_string(),
        };

        static SPLIT: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        let split = SPLIT.get_or_init(|| {
            Regex::new(r"^(?s)(.*?)(?:\s-\s(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}))?$")
                .expect("static regex must parse")
        });
        let (title, timestamp) = match split.captures(title) {
            Some(captures) => {
                let clean = captures.get(1).map_or("", |m| m.as_str()).to_string();
                let stamped = captures
                    .get(2)
                    .and_then(|m| {
                        NaiveDateTime::parse_from_str(m.as_str(), "%Y-%m-%d %H:%M:%S").ok()
                    })
                    .map(|naive| naive.and_utc());
                (clean, stamped.unwrap_or(timestamp))
            }
            None => (title.to_string(), timestamp),
        };

        DownloadingEntry {
            title,
            url,
            timestamp,
        }
    }
}

pub struct AttachmentDownloader<F: Fetcher> {
    ctx: SessionContext,
    fetcher: F,
}

impl<F: Fetcher> AttachmentDownloader<F> {
    pub fn new(ctx: SessionContext, fetcher: F) -> Self {
        Self { ctx, fetcher }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Give the session context back once downloading is done.
    pub fn into_inner(self) -> SessionContext {
        self.ctx
    }

    /// Collect the attachment anchors of every scraped body.
    fn collect_entries(&mut self) -> anyhow::Result<Vec<DownloadingEntry>> {
        let anchor = Selector::parse(ATTACHMENT_ANCHOR).expect("static selector must parse");
        let bodies = self.ctx.read(iter_bodies)?;

        let mut entries = Vec::new();
        for row in bodies {
            let Ok(base) = Url::parse(&row.url) else {
                debug!(url = %row.url, "body url is not absolute; skipped");
                continue;
            };
            let html = Html::parse_document(&row.body);
            for element in html.select(&anchor) {
                let Some(href) = element.attr("href") else {
                    continue;
                };
                let Ok(full_url) = base.join(href.trim()) else {
                    continue;
                };
                let title = element.text().collect::<String>().trim().to_string();
                entries.push(DownloadingEntry::create(
                    full_url.as_str(),
                    &title,
                    row.timestamp,
                ));
            }
        }
        Ok(entries)
    }

    /// Fetch and store every attachment not yet present. A failed fetch is
    /// recorded with null content so it is not retried on the next run.
    pub async fn download_all(&mut self) -> anyhow::Result<()> {
        let entries = self.collect_entries()?;
        info!(count = entries.len(), "attachment anchors collected");

        for entry in entries {
            info!(url = %entry.url, title = %entry.title, "processing download");
            let exists = self
                .ctx
                .read(|session| Attachment::entry_exists(session, &entry.url, entry.timestamp))?;
            if exists {
                debug!(url = %entry.url, "already downloaded; skipped");
                continue;
            }

            let content = match self.fetcher.open_bytes(&entry.url).await {
                Ok(content) => {
                    info!(length = content.len(), "retrieved content");
                    Some(content)
                }
                Err(e) if e.is_recoverable() => {
                    info!(error = %e, "failed to get content");
                    None
                }
                Err(e) => return Err(e.into()),
            };

            self.ctx.run(|session| {
                Attachment::put_entry(
                    session,
                    &entry.title,
                    &entry.url,
                    content.as_deref(),
                    entry.timestamp,
                )
            })?;
        }
        Ok(())
    }
}
