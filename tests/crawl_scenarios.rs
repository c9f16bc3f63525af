//! End-to-end crawl scenarios over the in-memory fetcher.

use std::cell::Cell;

use async_trait::async_trait;
use manaba_clone::crawl::Crawler;
use manaba_clone::family::{Canonicalized, Canonicalizer, GroupSpec, PageFamily};
use manaba_clone::fetcher::{FetchError, Fetcher, MemoryFetcher};
use manaba_clone::repository::crawl::{info, Job, JobOrder, JobState, Task, TaskRecord};
use manaba_clone::repository::{Dsn, SessionContext, StoreError};
use url::Url;

/// One group matching every `N.html` page, with itself as parent, so every
/// discovered link is followed.
fn chain_family() -> PageFamily {
    PageFamily::builder()
        .group(GroupSpec {
            name: "page",
            host: "site.test",
            path_pattern: r"/\d+\.html",
            canonicalizers: vec![],
            parent: Some("page"),
        })
        .build()
        .unwrap()
}

fn ctx() -> SessionContext {
    SessionContext::open(&Dsn::Memory).unwrap()
}

fn page(n: u32) -> String {
    format!("http://site.test/{n}.html")
}

/// Tasks of the finished job as (back_url, url, content) triples, walked
/// from the roots.
fn finished_job_edges(ctx: &mut SessionContext) -> Vec<(Option<String>, String, Option<String>)> {
    ctx.read(|session| {
        let job = Job::select(session, JobState::Finished, JobOrder::Latest)?
            .expect("a finished job must exist");
        let mut edges = Vec::new();
        let mut work: Vec<(Option<String>, TaskRecord)> = Task::iter_roots(session, job.id)?
            .into_iter()
            .map(|task| (None, task))
            .collect();
        while let Some((back, task)) = work.pop() {
            edges.push((back, task.url.clone(), task.content.clone()));
            for child in Task::iter_next(session, &task)? {
                work.push((Some(task.url.clone()), child));
            }
        }
        Ok::<_, StoreError>(edges)
    })
    .unwrap()
}

fn finished_job_counts(ctx: &mut SessionContext) -> (i64, i64, i64) {
    ctx.read(|session| {
        let job = Job::select(session, JobState::Finished, JobOrder::Latest)?
            .expect("a finished job must exist");
        let summary = info(session, &job)?;
        Ok::<_, StoreError>((
            summary.tasks_with_content,
            summary.tasks_without_content,
            summary.pages_in_db,
        ))
    })
    .unwrap()
}

#[tokio::test]
async fn test_chain_of_three() {
    let fetcher = MemoryFetcher::from_texts([
        (page(0).as_str(), r#"<a href="1.html"></a>"#),
        (page(1).as_str(), r#"<a href="2.html"></a>"#),
        (page(2).as_str(), ""),
    ]);
    let mut crawler = Crawler::new(ctx(), fetcher, chain_family());
    crawler.initialize(&[page(0)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    let (mut ctx, _) = crawler.into_inner();
    let (closed, open, pages) = finished_job_counts(&mut ctx);
    assert_eq!(closed, 3);
    assert_eq!(open, 0);
    assert_eq!(pages, 3);

    let mut edges = finished_job_edges(&mut ctx);
    edges.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(edges.len(), 3);
    assert_eq!(edges[0], (None, page(0), Some(r#"<a href="1.html"></a>"#.into())));
    assert_eq!(
        edges[1],
        (Some(page(0)), page(1), Some(r#"<a href="2.html"></a>"#.into()))
    );
    assert_eq!(edges[2], (Some(page(1)), page(2), Some(String::new())));
}

#[tokio::test]
async fn test_self_loop_enqueues_no_edge() {
    let fetcher = MemoryFetcher::from_texts([(page(0).as_str(), r#"<a href="0.html"></a>"#)]);
    let mut crawler = Crawler::new(ctx(), fetcher, chain_family());
    crawler.initialize(&[page(0)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    let (mut ctx, _) = crawler.into_inner();
    let (closed, open, _) = finished_job_counts(&mut ctx);
    assert_eq!(closed, 1);
    assert_eq!(open, 0);
}

#[tokio::test]
async fn test_duplicate_links_collapse_to_one_task() {
    let fetcher = MemoryFetcher::from_texts([
        (
            page(0).as_str(),
            r#"<a href="1.html"></a><a href="1.html"></a>"#,
        ),
        (page(1).as_str(), ""),
    ]);
    let mut crawler = Crawler::new(ctx(), fetcher, chain_family());
    crawler.initialize(&[page(0)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    let (mut ctx, _) = crawler.into_inner();
    let (closed, open, _) = finished_job_counts(&mut ctx);
    assert_eq!(closed, 2);
    assert_eq!(open, 0);
}

#[tokio::test]
async fn test_fetch_failure_closes_task_negatively() {
    // 1.html is never registered, so fetching it reports NotFound.
    let fetcher = MemoryFetcher::from_texts([(page(0).as_str(), r#"<a href="1.html"></a>"#)]);
    let mut crawler = Crawler::new(ctx(), fetcher, chain_family());
    crawler.initialize(&[page(0)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    let (mut ctx, _) = crawler.into_inner();
    let edges = finished_job_edges(&mut ctx);
    assert_eq!(edges.len(), 2);
    let failed = edges.iter().find(|(_, url, _)| *url == page(1)).unwrap();
    assert_eq!(failed.2, None);
}

/// Fails the first fetch fatally, simulating a process killed mid-step.
struct KilledOnceFetcher {
    inner: MemoryFetcher,
    kill_next: Cell<bool>,
}

#[async_trait(?Send)]
impl Fetcher for KilledOnceFetcher {
    async fn open_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if self.kill_next.replace(false) {
            return Err(FetchError::Io(std::io::Error::other("killed before commit")));
        }
        self.inner.open_bytes(url).await
    }
}

#[tokio::test]
async fn test_interrupted_step_rolls_back_and_resumes() {
    let files = [
        (page(0), r#"<a href="1.html"></a>"#.to_string()),
        (page(1), r#"<a href="2.html"></a>"#.to_string()),
        (page(2), String::new()),
    ];
    let fetcher = KilledOnceFetcher {
        inner: MemoryFetcher::from_texts(files.iter().map(|(u, b)| (u.as_str(), b.as_str()))),
        kill_next: Cell::new(true),
    };
    let mut crawler = Crawler::new(ctx(), fetcher, chain_family());
    crawler.initialize(&[page(0)]).unwrap();

    // The killed step must not record anything.
    assert!(crawler.process_one(JobOrder::Latest).await.is_err());

    crawler.crawl(JobOrder::Latest).await.unwrap();
    let (mut ctx, _) = crawler.into_inner();
    let (closed, open, pages) = finished_job_counts(&mut ctx);
    assert_eq!(closed, 3);
    assert_eq!(open, 0);
    assert_eq!(pages, 3);
}

#[tokio::test]
async fn test_canonicalization_collapses_surface_urls() {
    fn strip_fragment(url: &Url) -> Canonicalized {
        let mut rebuilt = url.clone();
        rebuilt.set_fragment(None);
        Canonicalized::Components(rebuilt)
    }
    let family = PageFamily::builder()
        .group(GroupSpec {
            name: "start",
            host: "site.test",
            path_pattern: r"/0\.html",
            canonicalizers: vec![],
            parent: None,
        })
        .group(GroupSpec {
            name: "p",
            host: "site.test",
            path_pattern: r"/p",
            canonicalizers: vec![strip_fragment as Canonicalizer],
            parent: Some("start"),
        })
        .build()
        .unwrap();

    let fetcher = MemoryFetcher::from_texts([
        (
            page(0).as_str(),
            r#"<a href="/p?a=1"></a><a href="/p?a=1#x"></a>"#,
        ),
        ("http://site.test/p?a=1", ""),
    ]);
    let mut crawler = Crawler::new(ctx(), fetcher, family);
    crawler.initialize(&[page(0)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    let (mut ctx, _) = crawler.into_inner();
    let (closed, open, _) = finished_job_counts(&mut ctx);
    assert_eq!(closed, 2);
    assert_eq!(open, 0);
}

#[tokio::test]
async fn test_force_initialize_reopens_finished_job() {
    let mut fetcher = MemoryFetcher::from_texts([(page(0).as_str(), "")]);
    fetcher.insert(&page(5), "fresh entry point");
    let mut crawler = Crawler::new(ctx(), fetcher, chain_family());
    crawler.initialize(&[page(0)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    // Re-seeding the same root is tolerated (logged, not fatal); a fresh
    // root re-opens the finished job.
    crawler.force_initialize(&[page(0), page(5)]).unwrap();
    crawler.crawl(JobOrder::Latest).await.unwrap();

    let (mut ctx, _) = crawler.into_inner();
    let (closed, open, _) = finished_job_counts(&mut ctx);
    assert_eq!(closed, 2);
    assert_eq!(open, 0);
}

#[tokio::test]
async fn test_process_one_without_jobs_reports_idle() {
    let mut crawler = Crawler::new(ctx(), MemoryFetcher::default(), chain_family());
    assert!(!crawler.process_one(JobOrder::Latest).await.unwrap());
}
