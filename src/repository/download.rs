//! Downloaded attachment storage.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::params;
use url::Url;

use super::{format_timestamp, to_option, Result, Session};

pub struct Attachment;

impl Attachment {
    /// Has an attachment for exactly this `(url, timestamp)` been stored?
    pub fn entry_exists(session: &Session, url: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let found: Option<i64> = to_option(session.tx().query_row(
            "SELECT id FROM attachment WHERE url = ?1 AND timestamp = ?2 LIMIT 1",
            params![url, format_timestamp(timestamp)],
            |row| row.get(0),
        ))?;
        Ok(found.is_some())
    }

    /// Store an attachment unless the `(url, timestamp)` pair already
    /// exists; returns the row id either way. The datatype is the extension
    /// of the URL path; `content = None` records a failed fetch.
    pub fn put_entry(
        session: &Session,
        title: &str,
        url: &str,
        content: Option<&[u8]>,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let existing: Option<i64> = to_option(session.tx().query_row(
            "SELECT id FROM attachment WHERE url = ?1 AND timestamp = ?2 LIMIT 1",
            params![url, format_timestamp(timestamp)],
            |row| row.get(0),
        ))?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let datatype = datatype_of(url);
        session.tx().execute(
            "INSERT INTO attachment (title, datatype, url, content, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, datatype, url, content, format_timestamp(timestamp)],
        )?;
        Ok(session.tx().last_insert_rowid())
    }
}

/// File extension of the URL path, dot included (empty when there is none).
fn datatype_of(url: &str) -> String {
    let path = Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    Path::new(&path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}
