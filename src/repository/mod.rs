//! Repository layer for database persistence.
//!
//! Every entity is owned by the store; in-memory handles are plain row
//! structs scoped to one [`Session`]. A session wraps a single transaction:
//! commit on success, rollback on drop. Crawl steps hold their session open
//! across the fetch so an interrupted step leaves no partial writes behind.

pub mod crawl;
pub mod download;
pub mod scrape;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("all tasks in the same job should be unique")]
    DuplicateTask,
    #[error("new url entry must have non-null group_name: {0}")]
    MissingGroupName(String),
    #[error("unregistered lookup id: {0}")]
    UnregisteredLookup(i64),
    #[error("unsupported database backend: {0}")]
    UnsupportedBackend(String),
    #[error("invalid connection string: {0}")]
    InvalidDsn(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Connection string, parsed once so no engine-specific text leaks into the
/// engines. SQLite is the wired backend; a MySQL DSN parses but is rejected
/// at connect time.
#[derive(Debug, Clone)]
pub enum Dsn {
    Sqlite { path: PathBuf },
    Memory,
    MySql { url: String },
}

impl Dsn {
    pub fn sqlite(path: impl AsRef<Path>) -> Dsn {
        Dsn::Sqlite {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn parse(raw: &str) -> Result<Dsn> {
        if let Some(path) = raw.strip_prefix("sqlite://") {
            if path == ":memory:" {
                return Ok(Dsn::Memory);
            }
            return Ok(Dsn::sqlite(path));
        }
        if raw.starts_with("mysql://") {
            return Ok(Dsn::MySql {
                url: raw.to_string(),
            });
        }
        if raw.contains("://") {
            return Err(StoreError::InvalidDsn(raw.to_string()));
        }
        // A bare path is an SQLite database file.
        Ok(Dsn::sqlite(raw))
    }
}

/// Create a database connection with settings tuned for one writer plus
/// occasional readers.
fn connect(dsn: &Dsn) -> Result<Connection> {
    let conn = match dsn {
        Dsn::Sqlite { path } => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::InvalidDsn(format!("{}: {e}", path.display())))?;
                }
            }
            Connection::open(path)?
        }
        Dsn::Memory => Connection::open_in_memory()?,
        Dsn::MySql { url } => return Err(StoreError::UnsupportedBackend(url.clone())),
    };

    // WAL persists, so this is effectively a one-time setting per database.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;

    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS job (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL
        );

        -- Interned URL identities; id is the 63-bit content hash of the url,
        -- with id 1 reserved for the null-url sentinel.
        CREATE TABLE IF NOT EXISTS lookup (
            id INTEGER PRIMARY KEY,
            url TEXT UNIQUE,
            group_name TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_lookup_url ON lookup(url);

        CREATE TABLE IF NOT EXISTS page_content (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            content TEXT,
            content_hash INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL REFERENCES job(id),
            url_id INTEGER NOT NULL REFERENCES lookup(id),
            back_url_id INTEGER NOT NULL REFERENCES lookup(id),
            timestamp TEXT NOT NULL,
            page_id INTEGER REFERENCES page_content(id),
            UNIQUE(job_id, url_id, back_url_id)
        );
        CREATE INDEX IF NOT EXISTS idx_task_job ON task(job_id);
        CREATE INDEX IF NOT EXISTS idx_task_page ON task(page_id);

        CREATE TABLE IF NOT EXISTS course (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            url TEXT NOT NULL,
            course_key TEXT,
            name TEXT,
            year INTEGER
        );

        CREATE TABLE IF NOT EXISTS course_schedule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER REFERENCES course(id),
            year INTEGER,
            semester INTEGER,
            weekday INTEGER,
            period INTEGER
        );

        CREATE TABLE IF NOT EXISTS course_instructor (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER REFERENCES course(id),
            name TEXT
        );

        CREATE TABLE IF NOT EXISTS course_news (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER REFERENCES course(id),
            timestamp TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            body TEXT
        );

        CREATE TABLE IF NOT EXISTS course_contents_page_list (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER REFERENCES course(id),
            timestamp TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            release_date TEXT
        );

        CREATE TABLE IF NOT EXISTS course_contents_page (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contents_page_list_id INTEGER REFERENCES course_contents_page_list(id),
            timestamp TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            body TEXT
        );

        CREATE TABLE IF NOT EXISTS attachment (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            datatype TEXT,
            url TEXT NOT NULL,
            content BLOB,
            timestamp TEXT NOT NULL,
            UNIQUE(url, timestamp)
        );
    "#,
    )?;
    Ok(())
}

/// Format a timestamp for storage. Microsecond precision with a fixed width,
/// so lexicographic text order equals chronological order.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, defaulting to the Unix epoch on error.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert a rusqlite Result<T> to Result<Option<T>>, treating
/// QueryReturnedNoRows as None.
pub(crate) fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Owner of one database connection, handing out transactional sessions.
///
/// Not shared across threads; each worker process opens its own context.
pub struct SessionContext {
    conn: Connection,
}

impl SessionContext {
    /// Open (and initialize) the database behind `dsn`.
    pub fn open(dsn: &Dsn) -> Result<SessionContext> {
        let conn = connect(dsn)?;
        init_schema(&conn)?;
        debug!(?dsn, "session context created");
        Ok(SessionContext { conn })
    }

    /// Begin a session whose lifetime the caller controls. Dropping the
    /// session without [`Session::commit`] rolls the transaction back.
    pub fn begin(&mut self) -> Result<Session<'_>> {
        let tx = self.conn.transaction()?;
        debug!("session CREATED");
        Ok(Session { tx })
    }

    /// Run `f` inside a transaction, committing on success. Any error rolls
    /// the transaction back and is re-raised.
    pub fn run<T, E>(&mut self, f: impl FnOnce(&Session) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let session = self.begin()?;
        let value = f(&session)?;
        session.commit()?;
        Ok(value)
    }

    /// Run `f` inside a transaction that is always rolled back (read-only).
    pub fn read<T, E>(&mut self, f: impl FnOnce(&Session) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let session = self.begin()?;
        let value = f(&session)?;
        debug!("session ROLLED BACK (read-only)");
        Ok(value)
    }
}

/// One open transaction. All repository operations take a session.
pub struct Session<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl Session<'_> {
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        debug!("session COMMITTED");
        Ok(())
    }

    /// Raw transaction handle, for queries the typed operations don't
    /// cover.
    pub fn tx(&self) -> &rusqlite::Transaction<'_> {
        &self.tx
    }
}
