//! Crawl state: jobs, interned URL lookups, tasks and fetched page content.
//!
//! A job is one traversal attempt. A task records "fetch `url`, discovered
//! from `back_url`"; it is created open and closed exactly once by attaching
//! a page-content row (whose content may be null, recording a permanent
//! fetch failure). A job is unfinished while any of its tasks is open.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::family::GroupedUrl;
use crate::identity::{string_hash_63, NULL_URL_ID};

use super::{format_timestamp, parse_timestamp, to_option, Result, Session, StoreError};

/// Which unfinished (or finished) job a step should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrder {
    Latest,
    Oldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Finished,
    Unfinished,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

impl Job {
    /// Create a fresh job for a new traversal attempt.
    pub fn create(session: &Session) -> Result<Job> {
        let timestamp = Utc::now();
        session.tx().execute(
            "INSERT INTO job (timestamp) VALUES (?1)",
            params![format_timestamp(timestamp)],
        )?;
        Ok(Job {
            id: session.tx().last_insert_rowid(),
            timestamp,
        })
    }

    /// Select the first finished/unfinished job by timestamp order.
    ///
    /// Unfinished means at least one task without a page; finished means the
    /// job has tasks and every one of them is closed. Ties on the timestamp
    /// break by id in the same direction, so selection is deterministic.
    pub fn select(session: &Session, state: JobState, order: JobOrder) -> Result<Option<Job>> {
        let unfinished_ids = "SELECT DISTINCT job_id FROM task WHERE page_id IS NULL";
        let filter = match state {
            JobState::Unfinished => format!("job.id IN ({unfinished_ids})"),
            JobState::Finished => format!(
                "job.id IN (SELECT DISTINCT job_id FROM task WHERE job_id NOT IN ({unfinished_ids}))"
            ),
        };
        let direction = match order {
            JobOrder::Latest => "DESC",
            JobOrder::Oldest => "ASC",
        };
        let sql = format!(
            "SELECT id, timestamp FROM job WHERE {filter} \
             ORDER BY timestamp {direction}, id {direction} LIMIT 1"
        );
        to_option(session.tx().query_row(&sql, [], |row| {
            Ok(Job {
                id: row.get(0)?,
                timestamp: parse_timestamp(&row.get::<_, String>(1)?),
            })
        }))
    }
}

/// Interned identity of a URL string, or the null sentinel for roots.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub id: i64,
    pub url: Option<String>,
    pub group_name: Option<String>,
}

/// How a lookup is requested. `Bare` resolves an already-interned URL and is
/// an error for unseen URLs, because a new row needs its group name.
#[derive(Debug, Clone, Copy)]
pub enum UrlRef<'a> {
    Null,
    Grouped(&'a GroupedUrl),
    Bare(&'a str),
}

impl Lookup {
    /// Find or create the lookup row for `url`.
    pub fn intern(session: &Session, url: UrlRef<'_>) -> Result<Lookup> {
        let key: Option<&str> = match url {
            UrlRef::Null => None,
            UrlRef::Grouped(grouped) => Some(&grouped.url),
            UrlRef::Bare(bare) => Some(bare),
        };

        let existing = match key {
            Some(key) => to_option(session.tx().query_row(
                "SELECT id, url, group_name FROM lookup WHERE url = ?1",
                params![key],
                Self::from_row,
            ))?,
            None => to_option(session.tx().query_row(
                "SELECT id, url, group_name FROM lookup WHERE url IS NULL",
                [],
                Self::from_row,
            ))?,
        };
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let entry = match url {
            UrlRef::Null => Lookup {
                id: NULL_URL_ID,
                url: None,
                group_name: None,
            },
            UrlRef::Grouped(grouped) => Lookup {
                id: string_hash_63(Some(&grouped.url)),
                url: Some(grouped.url.clone()),
                group_name: Some(grouped.group_name.clone()),
            },
            UrlRef::Bare(bare) => return Err(StoreError::MissingGroupName(bare.to_string())),
        };
        session.tx().execute(
            "INSERT INTO lookup (id, url, group_name) VALUES (?1, ?2, ?3)",
            params![entry.id, entry.url, entry.group_name],
        )?;
        Ok(entry)
    }

    /// Resolve a lookup by its interned id.
    pub fn by_id(session: &Session, id: i64) -> Result<Lookup> {
        to_option(session.tx().query_row(
            "SELECT id, url, group_name FROM lookup WHERE id = ?1",
            params![id],
            Self::from_row,
        ))?
        .ok_or(StoreError::UnregisteredLookup(id))
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Lookup> {
        Ok(Lookup {
            id: row.get(0)?,
            url: row.get(1)?,
            group_name: row.get(2)?,
        })
    }
}

/// The task selected for fetching: id plus its joined lookup.
#[derive(Debug, Clone)]
pub struct OpenTask {
    pub id: i64,
    pub url: String,
    pub group_name: String,
}

/// A task row joined with its lookup and page content, as the scrape walk
/// consumes it.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub job_id: i64,
    pub url_id: i64,
    pub url: String,
    pub group_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub content: Option<String>,
}

pub struct Task;

impl Task {
    /// Seed a job with a root task (back lookup is the null sentinel).
    ///
    /// Once a job has closed tasks, further roots are refused unless
    /// `force` is set; under `force` a duplicate `(job, url, back)` triple
    /// surfaces as [`StoreError::DuplicateTask`].
    pub fn add_initial_url(
        session: &Session,
        job: &Job,
        initial_grouped_url: &GroupedUrl,
        force: bool,
    ) -> Result<bool> {
        let closed_count: i64 = session.tx().query_row(
            "SELECT COUNT(*) FROM task WHERE job_id = ?1 AND page_id IS NOT NULL",
            params![job.id],
            |row| row.get(0),
        )?;
        if !force && closed_count > 0 {
            return Ok(false);
        }

        let lookup = Lookup::intern(session, UrlRef::Grouped(initial_grouped_url))?;
        let back_lookup = Lookup::intern(session, UrlRef::Null)?;
        Self::new_record(session, job, &lookup, &back_lookup)?;
        Ok(true)
    }

    /// Insert an open task. `(job, url, back_url)` must be unique.
    pub fn new_record(
        session: &Session,
        job: &Job,
        lookup: &Lookup,
        back_lookup: &Lookup,
    ) -> Result<i64> {
        if lookup.url.is_none() {
            return Err(StoreError::MissingGroupName(String::from("<null>")));
        }

        let existing: i64 = session.tx().query_row(
            "SELECT COUNT(*) FROM task WHERE job_id = ?1 AND url_id = ?2 AND back_url_id = ?3",
            params![job.id, lookup.id, back_lookup.id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(StoreError::DuplicateTask);
        }

        session.tx().execute(
            "INSERT INTO task (job_id, url_id, back_url_id, timestamp, page_id) \
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![
                job.id,
                lookup.id,
                back_lookup.id,
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(session.tx().last_insert_rowid())
    }

    /// Pick the most recent open task of the job (depth-favoring selection:
    /// closing a task inserts children with later timestamps, so the walk is
    /// a DFS without an in-memory stack). Ties break by id descending.
    pub fn open_task(session: &Session, job: &Job) -> Result<Option<OpenTask>> {
        to_option(session.tx().query_row(
            "SELECT t.id, l.url, l.group_name FROM task t \
             JOIN lookup l ON l.id = t.url_id \
             WHERE t.job_id = ?1 AND t.page_id IS NULL \
             ORDER BY t.timestamp DESC, t.id DESC LIMIT 1",
            params![job.id],
            |row| {
                Ok(OpenTask {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    group_name: row.get(2)?,
                })
            },
        ))
    }

    /// Close a task with the outcome of its fetch. `content = None` records
    /// a permanent failure; the task still counts as closed.
    pub fn close_task(session: &Session, task_id: i64, content: Option<&str>) -> Result<i64> {
        let page_id = PageContent::new_record(session, content)?;
        session.tx().execute(
            "UPDATE task SET page_id = ?1 WHERE id = ?2",
            params![page_id, task_id],
        )?;
        Ok(page_id)
    }

    /// Propagate pages to open duplicates: any open task whose URL already
    /// has a closed task in the same job takes that task's page, so one URL
    /// is fetched at most once per job. One server-side UPDATE; returns the
    /// number of filled rows.
    pub fn fill_pages(session: &Session, job: &Job) -> Result<usize> {
        let filled = session.tx().execute(
            "UPDATE task SET page_id = (\
                 SELECT t2.page_id FROM task t2 \
                 WHERE t2.job_id = task.job_id AND t2.url_id = task.url_id \
                   AND t2.page_id IS NOT NULL \
                 ORDER BY t2.id LIMIT 1\
             ) \
             WHERE job_id = ?1 AND page_id IS NULL AND url_id IN (\
                 SELECT t3.url_id FROM task t3 \
                 WHERE t3.job_id = ?1 AND t3.page_id IS NOT NULL\
             )",
            params![job.id],
        )?;
        Ok(filled)
    }

    /// Distinct group names among the job's task URLs.
    pub fn list_group_names(session: &Session, job_id: i64) -> Result<Vec<String>> {
        let mut stmt = session.tx().prepare(
            "SELECT DISTINCT l.group_name FROM lookup l \
             JOIN task t ON t.url_id = l.id \
             WHERE t.job_id = ?1 ORDER BY l.group_name",
        )?;
        let names = stmt
            .query_map(params![job_id], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names.into_iter().flatten().collect())
    }

    /// Tasks whose back lookup is the null sentinel: the entry points of the
    /// job's traversal graph.
    pub fn iter_roots(session: &Session, job_id: i64) -> Result<Vec<TaskRecord>> {
        let mut stmt = session.tx().prepare(
            "SELECT t.id, t.job_id, t.url_id, l.url, l.group_name, t.timestamp, p.content \
             FROM task t \
             JOIN lookup b ON b.id = t.back_url_id \
             JOIN lookup l ON l.id = t.url_id \
             LEFT JOIN page_content p ON p.id = t.page_id \
             WHERE t.job_id = ?1 AND b.url IS NULL \
             ORDER BY t.id",
        )?;
        let records = stmt
            .query_map(params![job_id], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Tasks of the same job discovered from `base`'s URL.
    pub fn iter_next(session: &Session, base: &TaskRecord) -> Result<Vec<TaskRecord>> {
        let mut stmt = session.tx().prepare(
            "SELECT t.id, t.job_id, t.url_id, l.url, l.group_name, t.timestamp, p.content \
             FROM task t \
             JOIN lookup l ON l.id = t.url_id \
             LEFT JOIN page_content p ON p.id = t.page_id \
             WHERE t.job_id = ?1 AND t.back_url_id = ?2 \
             ORDER BY t.id",
        )?;
        let records = stmt
            .query_map(params![base.job_id, base.url_id], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
        Ok(TaskRecord {
            id: row.get(0)?,
            job_id: row.get(1)?,
            url_id: row.get(2)?,
            url: row.get(3)?,
            group_name: row.get(4)?,
            timestamp: parse_timestamp(&row.get::<_, String>(5)?),
            content: row.get(6)?,
        })
    }
}

pub struct PageContent;

impl PageContent {
    /// Store a fetch outcome and return the new page id.
    pub fn new_record(session: &Session, content: Option<&str>) -> Result<i64> {
        session.tx().execute(
            "INSERT INTO page_content (timestamp, content, content_hash) VALUES (?1, ?2, ?3)",
            params![
                format_timestamp(Utc::now()),
                content,
                string_hash_63(content)
            ],
        )?;
        Ok(session.tx().last_insert_rowid())
    }
}

/// Per-step progress summary for the target job.
#[derive(Debug, Clone, Copy)]
pub struct CrawlInfo {
    pub tasks_without_content: i64,
    pub tasks_with_content: i64,
    pub pages_in_db: i64,
    pub lookup_size: i64,
}

pub fn info(session: &Session, job: &Job) -> Result<CrawlInfo> {
    let tx = session.tx();
    let count = |sql: &str, with_job: bool| -> Result<i64> {
        let value = if with_job {
            tx.query_row(sql, params![job.id], |row| row.get(0))?
        } else {
            tx.query_row(sql, [], |row| row.get(0))?
        };
        Ok(value)
    };
    Ok(CrawlInfo {
        tasks_without_content: count(
            "SELECT COUNT(*) FROM task WHERE job_id = ?1 AND page_id IS NULL",
            true,
        )?,
        tasks_with_content: count(
            "SELECT COUNT(*) FROM task WHERE job_id = ?1 AND page_id IS NOT NULL",
            true,
        )?,
        pages_in_db: count("SELECT COUNT(*) FROM page_content", false)?,
        lookup_size: count("SELECT COUNT(*) FROM lookup", false)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Dsn, SessionContext};

    fn grouped(url: &str) -> GroupedUrl {
        GroupedUrl {
            url: url.to_string(),
            group_name: "page".to_string(),
        }
    }

    fn ctx() -> SessionContext {
        SessionContext::open(&Dsn::Memory).unwrap()
    }

    #[test]
    fn test_lookup_intern_is_content_addressed() {
        let mut ctx = ctx();
        ctx.run(|session| {
            let first = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/1")))?;
            let second = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/1")))?;
            assert_eq!(first.id, second.id);
            assert_eq!(first.id, string_hash_63(Some("https://a.test/1")));

            let bare = Lookup::intern(session, UrlRef::Bare("https://a.test/1"))?;
            assert_eq!(bare.id, first.id);

            let by_id = Lookup::by_id(session, first.id)?;
            assert_eq!(by_id.url.as_deref(), Some("https://a.test/1"));
            assert!(matches!(
                Lookup::by_id(session, 42),
                Err(StoreError::UnregisteredLookup(42))
            ));

            let null = Lookup::intern(session, UrlRef::Null)?;
            assert_eq!(null.id, NULL_URL_ID);
            assert!(null.url.is_none());
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_bare_intern_of_unknown_url_is_invalid() {
        let mut ctx = ctx();
        let result: Result<()> = ctx.run(|session| {
            Lookup::intern(session, UrlRef::Bare("https://a.test/unseen")).map(|_| ())
        });
        assert!(matches!(result, Err(StoreError::MissingGroupName(_))));
    }

    #[test]
    fn test_duplicate_task_is_distinguished() {
        let mut ctx = ctx();
        let result: Result<()> = ctx.run(|session| {
            let job = Job::create(session)?;
            let lookup = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/1")))?;
            let back = Lookup::intern(session, UrlRef::Null)?;
            Task::new_record(session, &job, &lookup, &back)?;
            Task::new_record(session, &job, &lookup, &back).map(|_| ())
        });
        assert!(matches!(result, Err(StoreError::DuplicateTask)));
    }

    #[test]
    fn test_initial_urls_refused_after_first_closure_unless_forced() {
        let mut ctx = ctx();
        ctx.run(|session| {
            let job = Job::create(session)?;
            assert!(Task::add_initial_url(session, &job, &grouped("https://a.test/1"), false)?);
            let task = Task::open_task(session, &job)?.unwrap();
            Task::close_task(session, task.id, Some("<html></html>"))?;

            assert!(!Task::add_initial_url(
                session,
                &job,
                &grouped("https://a.test/2"),
                false
            )?);
            assert!(Task::add_initial_url(
                session,
                &job,
                &grouped("https://a.test/2"),
                true
            )?);

            // Forcing the same root again hits the uniqueness rule.
            let dup = Task::add_initial_url(session, &job, &grouped("https://a.test/2"), true);
            assert!(matches!(dup, Err(StoreError::DuplicateTask)));
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_task_prefers_latest() {
        let mut ctx = ctx();
        ctx.run(|session| {
            let job = Job::create(session)?;
            let back = Lookup::intern(session, UrlRef::Null)?;
            let first = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/1")))?;
            let second = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/2")))?;
            Task::new_record(session, &job, &first, &back)?;
            Task::new_record(session, &job, &second, &back)?;

            let open = Task::open_task(session, &job)?.unwrap();
            assert_eq!(open.url, "https://a.test/2");
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_fill_pages_links_open_duplicates() {
        let mut ctx = ctx();
        ctx.run(|session| {
            let job = Job::create(session)?;
            let back_a = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/a")))?;
            let back_b = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/b")))?;
            let target = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/t")))?;

            let closed_id = Task::new_record(session, &job, &target, &back_a)?;
            Task::new_record(session, &job, &target, &back_b)?;
            let page_id = Task::close_task(session, closed_id, Some("body"))?;

            assert_eq!(Task::fill_pages(session, &job)?, 1);
            // Idempotent on a second run.
            assert_eq!(Task::fill_pages(session, &job)?, 0);

            let filled: i64 = session.tx().query_row(
                "SELECT COUNT(*) FROM task WHERE job_id = ?1 AND page_id = ?2",
                params![job.id, page_id],
                |row| row.get(0),
            )?;
            assert_eq!(filled, 2);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_job_selection_by_state_and_order() {
        let mut ctx = ctx();
        ctx.run(|session| {
            let first = Job::create(session)?;
            let second = Job::create(session)?;

            // First job: one closed task (finished). Second job: open task.
            let back = Lookup::intern(session, UrlRef::Null)?;
            let url_one = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/1")))?;
            let url_two = Lookup::intern(session, UrlRef::Grouped(&grouped("https://a.test/2")))?;
            let done = Task::new_record(session, &first, &url_one, &back)?;
            Task::close_task(session, done, Some("x"))?;
            Task::new_record(session, &second, &url_two, &back)?;

            let unfinished = Job::select(session, JobState::Unfinished, JobOrder::Latest)?.unwrap();
            assert_eq!(unfinished.id, second.id);
            let finished = Job::select(session, JobState::Finished, JobOrder::Oldest)?.unwrap();
            assert_eq!(finished.id, first.id);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }
}
