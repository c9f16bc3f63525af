//! Page groups of the manaba course portal.
//!
//! The hierarchy below the course list:
//! `course_list → course → {course_news_list → course_news,
//! course_contents_list → course_contents_page_list → course_contents_page}`.

use url::Url;

use super::{
    query_map, set_query_param, with_query, Canonicalized, Canonicalizer, FamilyError, GroupSpec,
    PageFamily,
};

pub const MANABA_HOST: &str = "room.chuo-u.ac.jp";

/// Domain key used when requesting credentials for the portal's SSO.
pub const CERT_DOMAIN: &str = "chuo-sso";

const HOME_URL_FORMAT: &str = "https://room.chuo-u.ac.jp/ct/home_{period}?chglistformat=list";

/// Course-list period selector on the home screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Current,
    Past,
    Future,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Current, Period::Past, Period::Future];

    fn suffix(self) -> &'static str {
        match self {
            Period::Current => "",
            Period::Past => "_past",
            Period::Future => "_upcoming",
        }
    }
}

/// The home URLs the crawler seeds a job with, one per period.
pub fn home_urls(periods: &[Period]) -> Vec<String> {
    periods
        .iter()
        .map(|period| HOME_URL_FORMAT.replace("{period}", period.suffix()))
        .collect()
}

/// The course list renders as a list, never as a thumbnail grid, so two
/// surface URLs of the same screen collapse to one lookup row.
fn force_list_format(url: &Url) -> Canonicalized {
    let mut pairs = query_map(url);
    set_query_param(&mut pairs, "chglistformat", "list");
    Canonicalized::Components(with_query(url, &pairs))
}

/// Pin pagination to the first page with the maximum page length when the
/// query carries both parameters.
fn normalize_start_and_page_len_query(url: &Url) -> Canonicalized {
    let mut pairs = query_map(url);
    let has_both = pairs.iter().any(|(k, _)| k == "start") && pairs.iter().any(|(k, _)| k == "pagelen");
    if has_both {
        set_query_param(&mut pairs, "start", "1");
        set_query_param(&mut pairs, "pagelen", "100");
    }
    Canonicalized::Components(with_query(url, &pairs))
}

fn remove_header_fragment(url: &Url) -> Canonicalized {
    let mut rebuilt = url.clone();
    rebuilt.set_fragment(None);
    Canonicalized::Components(rebuilt)
}

/// Build the portal's page family.
///
/// The home path keeps its double-underscore optional suffix: the period
/// URLs are `home_`, `home__past` and `home__upcoming`.
pub fn manaba_family() -> Result<PageFamily, FamilyError> {
    PageFamily::builder()
        .group(GroupSpec {
            name: "course_list",
            host: MANABA_HOST,
            path_pattern: r"/ct/home_(_[a-z]+)?",
            canonicalizers: vec![force_list_format as Canonicalizer],
            parent: None,
        })
        .group(GroupSpec {
            name: "course",
            host: MANABA_HOST,
            path_pattern: r"/ct/course_\d+",
            canonicalizers: vec![],
            parent: Some("course_list"),
        })
        .group(GroupSpec {
            name: "course_news_list",
            host: MANABA_HOST,
            path_pattern: r"/ct/course_\d+_news",
            canonicalizers: vec![normalize_start_and_page_len_query as Canonicalizer],
            parent: Some("course"),
        })
        .group(GroupSpec {
            name: "course_news",
            host: MANABA_HOST,
            path_pattern: r"/ct/course_\d+_news_\d+",
            canonicalizers: vec![],
            parent: Some("course_news_list"),
        })
        .group(GroupSpec {
            name: "course_contents_list",
            host: MANABA_HOST,
            path_pattern: r"/ct/course_\d+_page",
            canonicalizers: vec![remove_header_fragment as Canonicalizer],
            parent: Some("course"),
        })
        .group(GroupSpec {
            name: "course_contents_page_list",
            host: MANABA_HOST,
            path_pattern: r"/ct/page_\d+c\d+",
            canonicalizers: vec![remove_header_fragment as Canonicalizer],
            parent: Some("course_contents_list"),
        })
        .group(GroupSpec {
            name: "course_contents_page",
            host: MANABA_HOST,
            path_pattern: r"/ct/page_\d+c\d+_\d+",
            canonicalizers: vec![remove_header_fragment as Canonicalizer],
            parent: Some("course_contents_page_list"),
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_urls_cover_every_period() {
        let urls = home_urls(&Period::ALL);
        assert_eq!(
            urls,
            vec![
                "https://room.chuo-u.ac.jp/ct/home_?chglistformat=list",
                "https://room.chuo-u.ac.jp/ct/home__past?chglistformat=list",
                "https://room.chuo-u.ac.jp/ct/home__upcoming?chglistformat=list",
            ]
        );
    }

    #[test]
    fn test_home_urls_classify_as_course_list() {
        let family = manaba_family().unwrap();
        for url in home_urls(&Period::ALL) {
            let grouped = family.classify(&url).unwrap();
            assert_eq!(grouped.group_name, "course_list");
            assert_eq!(grouped.url, url);
        }
    }

    #[test]
    fn test_course_list_forces_list_format() {
        let family = manaba_family().unwrap();
        let grouped = family
            .classify("https://room.chuo-u.ac.jp/ct/home_?chglistformat=thumbnail")
            .unwrap();
        assert_eq!(
            grouped.url,
            "https://room.chuo-u.ac.jp/ct/home_?chglistformat=list"
        );
    }

    #[test]
    fn test_news_list_pagination_normalized_only_when_both_present() {
        let family = manaba_family().unwrap();
        let grouped = family
            .classify("https://room.chuo-u.ac.jp/ct/course_123_news?start=3&pagelen=20")
            .unwrap();
        assert_eq!(
            grouped.url,
            "https://room.chuo-u.ac.jp/ct/course_123_news?start=1&pagelen=100"
        );

        let grouped = family
            .classify("https://room.chuo-u.ac.jp/ct/course_123_news?start=3")
            .unwrap();
        assert_eq!(
            grouped.url,
            "https://room.chuo-u.ac.jp/ct/course_123_news?start=3"
        );
    }

    #[test]
    fn test_fragment_stripped_on_contents_pages() {
        let family = manaba_family().unwrap();
        let grouped = family
            .classify("https://room.chuo-u.ac.jp/ct/page_12c34_56#anchor")
            .unwrap();
        assert_eq!(grouped.group_name, "course_contents_page");
        assert_eq!(grouped.url, "https://room.chuo-u.ac.jp/ct/page_12c34_56");
    }

    #[test]
    fn test_canonicalization_idempotent_for_every_group() {
        let family = manaba_family().unwrap();
        let samples = [
            "https://room.chuo-u.ac.jp/ct/home_?chglistformat=thumbnail",
            "https://room.chuo-u.ac.jp/ct/course_1",
            "https://room.chuo-u.ac.jp/ct/course_1_news?start=5&pagelen=10",
            "https://room.chuo-u.ac.jp/ct/course_1_news_2",
            "https://room.chuo-u.ac.jp/ct/course_1_page#top",
            "https://room.chuo-u.ac.jp/ct/page_1c2#x",
            "https://room.chuo-u.ac.jp/ct/page_1c2_3#y",
        ];
        for url in samples {
            let once = family.classify(url).unwrap();
            let twice = family.classify(&once.url).unwrap();
            assert_eq!(once.url, twice.url, "not idempotent for {url}");
            assert_eq!(once.group_name, twice.group_name);
        }
    }

    #[test]
    fn test_hierarchy_edges() {
        let family = manaba_family().unwrap();
        let classify = |u: &str| family.classify(u).unwrap();
        let home = classify("https://room.chuo-u.ac.jp/ct/home_");
        let course = classify("https://room.chuo-u.ac.jp/ct/course_1");
        let news_list = classify("https://room.chuo-u.ac.jp/ct/course_1_news");
        let news = classify("https://room.chuo-u.ac.jp/ct/course_1_news_9");
        let contents_list = classify("https://room.chuo-u.ac.jp/ct/course_1_page");
        let page_list = classify("https://room.chuo-u.ac.jp/ct/page_1c2");
        let page = classify("https://room.chuo-u.ac.jp/ct/page_1c2_3");

        assert!(family.is_child_of(&course, &home));
        assert!(family.is_child_of(&news_list, &course));
        assert!(family.is_child_of(&news, &news_list));
        assert!(family.is_child_of(&contents_list, &course));
        assert!(family.is_child_of(&page_list, &contents_list));
        assert!(family.is_child_of(&page, &page_list));

        assert!(!family.is_child_of(&news, &course));
        assert!(!family.is_child_of(&home, &course));
    }
}
