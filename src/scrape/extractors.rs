//! Per-group extractors for the manaba portal.
//!
//! Each extractor looks up an existing record by `(url, timestamp)` before
//! parsing, so walking the same job twice is a no-op. Tasks whose page
//! content is null (a recorded fetch failure) are skipped; the walk still
//! descends through them.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::repository::crawl::TaskRecord;
use crate::repository::scrape::{
    Course, CourseContentsPage, CourseContentsPageList, CourseNews, NewContentsPage,
    NewContentsPageList, NewCourse, NewCourseNews, NewSchedule,
};
use crate::repository::{Session, SessionContext};

use super::{EntryKind, Extractor, GroupHandler, ParentEntry, ParentStack, Scraper};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

fn select_text(html: &Html, css: &str) -> Option<String> {
    html.select(&selector(css))
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
}

fn select_inner_html(html: &Html, css: &str) -> Option<String> {
    html.select(&selector(css))
        .next()
        .map(|element: ElementRef| element.inner_html())
}

const WEEKDAYS: &str = "月火水木金土日";

/// Weekly slots from a schedule string such as `前期 金 3時限 金 4時限`.
/// `通年` expands into the same slots for both semesters. Strings that do
/// not follow the portal's shape yield no slots.
fn schedule_fields(year: Option<i64>, text: &str) -> Vec<NewSchedule> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let Some((&head, rest)) = parts.split_first() else {
        return Vec::new();
    };

    if head == "通年" {
        let rest = rest.join(" ");
        let mut slots = schedule_fields(year, &format!("前期 {rest}"));
        slots.extend(schedule_fields(year, &format!("後期 {rest}")));
        return slots;
    }

    let mut chars = head.chars();
    let (Some(first), Some(second), None) = (chars.next(), chars.next(), chars.next()) else {
        return Vec::new();
    };
    let semester = match first {
        '前' => 0,
        '後' => 1,
        _ => return Vec::new(),
    };
    if second != '期' && second != '複' {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut tokens = rest.iter();
    while let (Some(weekday_token), Some(period_token)) = (tokens.next(), tokens.next()) {
        let Some(weekday) = WEEKDAYS.chars().position(|c| weekday_token.chars().eq([c])) else {
            continue;
        };
        let Some(period) = period_token
            .strip_suffix("時限")
            .and_then(|digits| digits.parse::<i64>().ok())
        else {
            continue;
        };
        slots.push(NewSchedule {
            year,
            semester,
            weekday: weekday as i64,
            period,
        });
    }
    slots
}

/// Instructor names from the comma-separated banner text.
fn instructor_fields(text: &str) -> Vec<String> {
    text.split('、')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Course pages: the course serial from the URL, the name banner, the
/// academic year and weekly slots from the course data line, and the
/// instructor list.
pub struct CourseExtractor {
    serial: Regex,
}

impl CourseExtractor {
    pub fn new() -> Self {
        Self {
            serial: Regex::new(r"/ct/course_(\d+)").expect("static regex must parse"),
        }
    }
}

impl Default for CourseExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for CourseExtractor {
    fn extract(
        &self,
        session: &Session,
        task: &TaskRecord,
        _parents: &ParentStack,
    ) -> anyhow::Result<Option<ParentEntry>> {
        if let Some(id) = Course::find_duplicate(session, &task.url, task.timestamp)? {
            debug!(url = %task.url, "insertion cancelled (duplicate)");
            return Ok(Some(ParentEntry {
                kind: EntryKind::Course,
                id,
            }));
        }
        let Some(content) = task.content.as_deref() else {
            debug!(url = %task.url, "no page content; skipped");
            return Ok(None);
        };
        let html = Html::parse_document(content);

        let course_key = self
            .serial
            .captures(&task.url)
            .map(|captures| captures[1].to_string());
        let name = select_text(&html, "a#coursename");

        // The course data line is "{year} {schedule...}".
        let (year, schedules) = match select_text(&html, ".coursedata-info") {
            Some(text) => {
                let (year_token, schedule_text) =
                    text.split_once(char::is_whitespace).unwrap_or((text.as_str(), ""));
                let year = year_token.parse::<i64>().ok();
                (year, schedule_fields(year, schedule_text))
            }
            None => (None, Vec::new()),
        };
        let instructors = select_text(&html, ".courseteacher")
            .map(|text| instructor_fields(&text))
            .unwrap_or_default();

        let id = Course::insert(
            session,
            &NewCourse {
                url: task.url.clone(),
                timestamp: task.timestamp,
                course_key,
                name,
                year,
                schedules,
                instructors,
            },
        )?;
        Ok(Some(ParentEntry {
            kind: EntryKind::Course,
            id,
        }))
    }
}

/// News bulletins: subject and message body, owned by the nearest course.
pub struct CourseNewsExtractor;

impl Extractor for CourseNewsExtractor {
    fn extract(
        &self,
        session: &Session,
        task: &TaskRecord,
        parents: &ParentStack,
    ) -> anyhow::Result<Option<ParentEntry>> {
        if let Some(id) = CourseNews::find_duplicate(session, &task.url, task.timestamp)? {
            debug!(url = %task.url, "insertion cancelled (duplicate)");
            return Ok(Some(ParentEntry {
                kind: EntryKind::CourseNews,
                id,
            }));
        }
        let Some(content) = task.content.as_deref() else {
            debug!(url = %task.url, "no page content; skipped");
            return Ok(None);
        };
        let html = Html::parse_document(content);

        let course_id = parents
            .nearest(EntryKind::Course)
            .ok_or_else(|| anyhow::anyhow!("course news without a course ancestor"))?;
        let id = CourseNews::insert(
            session,
            &NewCourseNews {
                course_id,
                url: task.url.clone(),
                timestamp: task.timestamp,
                title: select_text(&html, "h2.msg-subject"),
                body: select_inner_html(&html, ".msg-text"),
            },
        )?;
        Ok(Some(ParentEntry {
            kind: EntryKind::CourseNews,
            id,
        }))
    }
}

/// Contents page lists: the list title and its last-modified stamp.
pub struct ContentsPageListExtractor {
    modtime: Regex,
}

impl ContentsPageListExtractor {
    pub fn new() -> Self {
        Self {
            modtime: Regex::new(r"\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}").expect("static regex must parse"),
        }
    }

    fn release_date(&self, html: &Html) -> Option<DateTime<Utc>> {
        let text = select_text(html, ".contents-modtime")?;
        let matched = self.modtime.find(&text)?;
        NaiveDateTime::parse_from_str(matched.as_str(), "%Y-%m-%d %H:%M")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl Default for ContentsPageListExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for ContentsPageListExtractor {
    fn extract(
        &self,
        session: &Session,
        task: &TaskRecord,
        parents: &ParentStack,
    ) -> anyhow::Result<Option<ParentEntry>> {
        if let Some(id) = CourseContentsPageList::find_duplicate(session, &task.url, task.timestamp)? {
            debug!(url = %task.url, "insertion cancelled (duplicate)");
            return Ok(Some(ParentEntry {
                kind: EntryKind::CourseContentsPageList,
                id,
            }));
        }
        let Some(content) = task.content.as_deref() else {
            debug!(url = %task.url, "no page content; skipped");
            return Ok(None);
        };
        let html = Html::parse_document(content);

        let course_id = parents
            .nearest(EntryKind::Course)
            .ok_or_else(|| anyhow::anyhow!("contents page list without a course ancestor"))?;
        let id = CourseContentsPageList::insert(
            session,
            &NewContentsPageList {
                course_id,
                url: task.url.clone(),
                timestamp: task.timestamp,
                title: select_text(&html, "h1.contents > a"),
                release_date: self.release_date(&html),
            },
        )?;
        Ok(Some(ParentEntry {
            kind: EntryKind::CourseContentsPageList,
            id,
        }))
    }
}

/// Contents pages: heading and body HTML, owned by their page list.
pub struct ContentsPageExtractor;

impl Extractor for ContentsPageExtractor {
    fn extract(
        &self,
        session: &Session,
        task: &TaskRecord,
        parents: &ParentStack,
    ) -> anyhow::Result<Option<ParentEntry>> {
        if let Some(id) = CourseContentsPage::find_duplicate(session, &task.url, task.timestamp)? {
            debug!(url = %task.url, "insertion cancelled (duplicate)");
            return Ok(Some(ParentEntry {
                kind: EntryKind::CourseContentsPage,
                id,
            }));
        }
        let Some(content) = task.content.as_deref() else {
            debug!(url = %task.url, "no page content; skipped");
            return Ok(None);
        };
        let html = Html::parse_document(content);

        let contents_page_list_id = parents
            .nearest(EntryKind::CourseContentsPageList)
            .ok_or_else(|| anyhow::anyhow!("contents page without a page list ancestor"))?;
        let id = CourseContentsPage::insert(
            session,
            &NewContentsPage {
                contents_page_list_id,
                url: task.url.clone(),
                timestamp: task.timestamp,
                title: select_text(&html, ".contentbody-left > h1"),
                body: select_inner_html(&html, ".contentbody-left"),
            },
        )?;
        Ok(Some(ParentEntry {
            kind: EntryKind::CourseContentsPage,
            id,
        }))
    }
}

/// A scraper with the portal's full group → handler table.
pub fn manaba_scraper(ctx: SessionContext) -> Scraper {
    let mut scraper = Scraper::new(ctx);
    scraper.register("course_list", GroupHandler::Ignore);
    scraper.register("course", GroupHandler::Extract(Box::new(CourseExtractor::new())));
    scraper.register("course_news_list", GroupHandler::Ignore);
    scraper.register(
        "course_news",
        GroupHandler::Extract(Box::new(CourseNewsExtractor)),
    );
    scraper.register("course_contents_list", GroupHandler::Ignore);
    scraper.register(
        "course_contents_page_list",
        GroupHandler::Extract(Box::new(ContentsPageListExtractor::new())),
    );
    scraper.register(
        "course_contents_page",
        GroupHandler::Extract(Box::new(ContentsPageExtractor)),
    );
    scraper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_fields_from_page() {
        let html = Html::parse_document(
            r##"<html><body>
                <a id="coursename" href="/ct/course_3428678">電磁気学及演習２</a>
                <div class="coursedata-info">2022 前期 金 3時限 金 4時限</div>
                <div class="courseteacher">白井　宏、山田　太郎</div>
            </body></html>"##,
        );
        assert_eq!(select_text(&html, "a#coursename").as_deref(), Some("電磁気学及演習２"));

        let extractor = CourseExtractor::new();
        let serial = extractor
            .serial
            .captures("https://room.chuo-u.ac.jp/ct/course_3428678")
            .map(|c| c[1].to_string());
        assert_eq!(serial.as_deref(), Some("3428678"));
    }

    #[test]
    fn test_schedule_fields_single_semester() {
        let slots = schedule_fields(Some(2022), "前期 金 3時限 金 4時限");
        assert_eq!(
            slots,
            vec![
                NewSchedule {
                    year: Some(2022),
                    semester: 0,
                    weekday: 4,
                    period: 3,
                },
                NewSchedule {
                    year: Some(2022),
                    semester: 0,
                    weekday: 4,
                    period: 4,
                },
            ]
        );
    }

    #[test]
    fn test_schedule_fields_full_year_expands_both_semesters() {
        let slots = schedule_fields(Some(2022), "通年 月 1時限");
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].semester, 0);
        assert_eq!(slots[1].semester, 1);
        assert!(slots.iter().all(|slot| slot.weekday == 0 && slot.period == 1));
    }

    #[test]
    fn test_schedule_fields_rejects_unknown_shapes() {
        assert!(schedule_fields(None, "").is_empty());
        assert!(schedule_fields(None, "集中講義 月 1時限").is_empty());
    }

    #[test]
    fn test_instructor_fields_split() {
        assert_eq!(
            instructor_fields("白井　宏、山田　太郎"),
            vec!["白井　宏".to_string(), "山田　太郎".to_string()]
        );
        assert!(instructor_fields("  ").is_empty());
    }

    #[test]
    fn test_release_date_parsing() {
        let extractor = ContentsPageListExtractor::new();
        let html = Html::parse_document(
            r##"<div class="contents-modtime">最終更新 2022-04-01 09:30 管理者</div>"##,
        );
        let parsed = extractor.release_date(&html).unwrap();
        assert_eq!(
            parsed,
            NaiveDateTime::parse_from_str("2022-04-01 09:30", "%Y-%m-%d %H:%M")
                .unwrap()
                .and_utc()
        );
    }

    #[test]
    fn test_news_body_keeps_inner_html() {
        let html = Html::parse_document(
            r##"<h2 class="msg-subject"> 休講のお知らせ </h2>
                <div class="msg-text"><p>明日は<b>休講</b>です。</p></div>"##,
        );
        assert_eq!(
            select_text(&html, "h2.msg-subject").as_deref(),
            Some("休講のお知らせ")
        );
        assert_eq!(
            select_inner_html(&html, ".msg-text").as_deref(),
            Some("<p>明日は<b>休講</b>です。</p>")
        );
    }
}
