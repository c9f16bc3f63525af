//! Scraper tables: typed records extracted per page group.
//!
//! Every row keeps the source `url` and the originating task `timestamp`;
//! the pair doubles as the duplicate key so re-running a walk over the same
//! job inserts nothing new. Parent foreign keys follow the declared group
//! hierarchy (news and contents-page lists hang off a course, contents
//! pages hang off their page list).

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{format_timestamp, Result, Session};

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub course_key: Option<String>,
    pub name: Option<String>,
    pub year: Option<i64>,
    pub schedules: Vec<NewSchedule>,
    pub instructors: Vec<String>,
}

/// One weekly slot of a course: semester 0 is spring, 1 is fall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub year: Option<i64>,
    pub semester: i64,
    pub weekday: i64,
    pub period: i64,
}

pub struct Course;

impl Course {
    pub fn find_duplicate(
        session: &Session,
        url: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        find_duplicate(session, "course", url, timestamp)
    }

    /// Insert a course with its schedule and instructor child rows.
    pub fn insert(session: &Session, record: &NewCourse) -> Result<i64> {
        session.tx().execute(
            "INSERT INTO course (timestamp, url, course_key, name, year) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_timestamp(record.timestamp),
                record.url,
                record.course_key,
                record.name,
                record.year
            ],
        )?;
        let course_id = session.tx().last_insert_rowid();

        for schedule in &record.schedules {
            session.tx().execute(
                "INSERT INTO course_schedule (course_id, year, semester, weekday, period) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    course_id,
                    schedule.year,
                    schedule.semester,
                    schedule.weekday,
                    schedule.period
                ],
            )?;
        }
        for instructor in &record.instructors {
            session.tx().execute(
                "INSERT INTO course_instructor (course_id, name) VALUES (?1, ?2)",
                params![course_id, instructor],
            )?;
        }
        Ok(course_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewCourseNews {
    pub course_id: i64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub title: Option<String>,
    pub body: Option<String>,
}

pub struct CourseNews;

impl CourseNews {
    pub fn find_duplicate(
        session: &Session,
        url: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        find_duplicate(session, "course_news", url, timestamp)
    }

    pub fn insert(session: &Session, record: &NewCourseNews) -> Result<i64> {
        session.tx().execute(
            "INSERT INTO course_news (course_id, timestamp, url, title, body) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.course_id,
                format_timestamp(record.timestamp),
                record.url,
                record.title,
                record.body
            ],
        )?;
        Ok(session.tx().last_insert_rowid())
    }
}

#[derive(Debug, Clone)]
pub struct NewContentsPageList {
    pub course_id: i64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub title: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
}

pub struct CourseContentsPageList;

impl CourseContentsPageList {
    pub fn find_duplicate(
        session: &Session,
        url: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        find_duplicate(session, "course_contents_page_list", url, timestamp)
    }

    pub fn insert(session: &Session, record: &NewContentsPageList) -> Result<i64> {
        session.tx().execute(
            "INSERT INTO course_contents_page_list \
             (course_id, timestamp, url, title, release_date) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.course_id,
                format_timestamp(record.timestamp),
                record.url,
                record.title,
                record.release_date.map(format_timestamp)
            ],
        )?;
        Ok(session.tx().last_insert_rowid())
    }
}

#[derive(Debug, Clone)]
pub struct NewContentsPage {
    pub contents_page_list_id: i64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub title: Option<String>,
    pub body: Option<String>,
}

pub struct CourseContentsPage;

impl CourseContentsPage {
    pub fn find_duplicate(
        session: &Session,
        url: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        find_duplicate(session, "course_contents_page", url, timestamp)
    }

    pub fn insert(session: &Session, record: &NewContentsPage) -> Result<i64> {
        session.tx().execute(
            "INSERT INTO course_contents_page \
             (contents_page_list_id, timestamp, url, title, body) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.contents_page_list_id,
                format_timestamp(record.timestamp),
                record.url,
                record.title,
                record.body
            ],
        )?;
        Ok(session.tx().last_insert_rowid())
    }
}

fn find_duplicate(
    session: &Session,
    table: &str,
    url: &str,
    timestamp: DateTime<Utc>,
) -> Result<Option<i64>> {
    let sql = format!("SELECT id FROM {table} WHERE url = ?1 AND timestamp = ?2 LIMIT 1");
    super::to_option(session.tx().query_row(
        &sql,
        params![url, format_timestamp(timestamp)],
        |row| row.get(0),
    ))
}

/// Delete every scraper row ahead of a fresh walk.
pub fn reset_scraper_tables(session: &Session) -> Result<()> {
    for table in [
        "course_contents_page",
        "course_contents_page_list",
        "course_news",
        "course_schedule",
        "course_instructor",
        "course",
    ] {
        session.tx().execute(&format!("DELETE FROM {table}"), [])?;
        tracing::info!(table, "scraper table cleared");
    }
    Ok(())
}

/// A scraped row carrying an HTML body, as consumed by the attachment
/// downloader.
#[derive(Debug, Clone)]
pub struct BodyRow {
    pub url: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// All rows of the body-carrying tables (news and contents pages).
pub fn iter_bodies(session: &Session) -> Result<Vec<BodyRow>> {
    let mut rows = Vec::new();
    for table in ["course_news", "course_contents_page"] {
        let sql =
            format!("SELECT url, body, timestamp FROM {table} WHERE body IS NOT NULL ORDER BY id");
        let mut stmt = session.tx().prepare(&sql)?;
        let mapped = stmt.query_map([], |row| {
            Ok(BodyRow {
                url: row.get(0)?,
                body: row.get(1)?,
                timestamp: super::parse_timestamp(&row.get::<_, String>(2)?),
            })
        })?;
        for row in mapped {
            rows.push(row?);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Dsn, SessionContext, StoreError};

    #[test]
    fn test_duplicate_detection_by_url_and_timestamp() {
        let mut ctx = SessionContext::open(&Dsn::Memory).unwrap();
        ctx.run(|session| {
            let timestamp = Utc::now();
            let record = NewCourse {
                url: "https://room.chuo-u.ac.jp/ct/course_1".into(),
                timestamp,
                course_key: Some("1".into()),
                name: Some("電磁気学".into()),
                year: Some(2024),
                schedules: vec![NewSchedule {
                    year: Some(2024),
                    semester: 0,
                    weekday: 4,
                    period: 3,
                }],
                instructors: vec!["白井　宏".into()],
            };
            let id = Course::insert(session, &record)?;
            assert_eq!(
                Course::find_duplicate(session, &record.url, timestamp)?,
                Some(id)
            );

            let schedules: i64 = session.tx().query_row(
                "SELECT COUNT(*) FROM course_schedule WHERE course_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            let instructors: i64 = session.tx().query_row(
                "SELECT COUNT(*) FROM course_instructor WHERE course_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            assert_eq!(schedules, 1);
            assert_eq!(instructors, 1);
            assert_eq!(
                Course::find_duplicate(session, &record.url, timestamp + chrono::Duration::seconds(1))?,
                None
            );
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_reset_clears_every_scraper_table() {
        let mut ctx = SessionContext::open(&Dsn::Memory).unwrap();
        ctx.run(|session| {
            let timestamp = Utc::now();
            let course_id = Course::insert(
                session,
                &NewCourse {
                    url: "https://room.chuo-u.ac.jp/ct/course_1".into(),
                    timestamp,
                    course_key: None,
                    name: None,
                    year: None,
                    schedules: vec![],
                    instructors: vec![],
                },
            )?;
            CourseNews::insert(
                session,
                &NewCourseNews {
                    course_id,
                    url: "https://room.chuo-u.ac.jp/ct/course_1_news_1".into(),
                    timestamp,
                    title: Some("notice".into()),
                    body: Some("<p>hi</p>".into()),
                },
            )?;
            reset_scraper_tables(session)?;
            assert!(iter_bodies(session)?.is_empty());
            let count: i64 =
                session
                    .tx()
                    .query_row("SELECT COUNT(*) FROM course", [], |row| row.get(0))?;
            assert_eq!(count, 0);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_iter_bodies_spans_news_and_contents_pages() {
        let mut ctx = SessionContext::open(&Dsn::Memory).unwrap();
        ctx.run(|session| {
            let timestamp = Utc::now();
            CourseNews::insert(
                session,
                &NewCourseNews {
                    course_id: 1,
                    url: "https://room.chuo-u.ac.jp/ct/course_1_news_1".into(),
                    timestamp,
                    title: None,
                    body: Some("<p>news</p>".into()),
                },
            )?;
            CourseContentsPage::insert(
                session,
                &NewContentsPage {
                    contents_page_list_id: 1,
                    url: "https://room.chuo-u.ac.jp/ct/page_1c2_3".into(),
                    timestamp,
                    title: None,
                    body: Some("<p>page</p>".into()),
                },
            )?;
            let bodies = iter_bodies(session)?;
            assert_eq!(bodies.len(), 2);
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }
}
