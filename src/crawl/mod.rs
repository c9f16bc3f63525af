//! Crawl engine: job lifecycle, task selection, link expansion.
//!
//! A crawl is a sequence of short steps. Each step runs in one session:
//! pick the target job, propagate already-fetched pages to duplicate tasks,
//! open the most recent open task, fetch it, enqueue the surviving child
//! links and close the task. Killing the process mid-step rolls the step
//! back; the next step re-reads persistent state and retries the task.

use std::collections::HashSet;

use anyhow::{bail, Context};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::family::{GroupedUrl, PageFamily};
use crate::fetcher::Fetcher;
use crate::repository::crawl::{info as crawl_info, Job, JobOrder, JobState, Lookup, Task, UrlRef};
use crate::repository::{SessionContext, StoreError};

pub struct Crawler<F: Fetcher> {
    ctx: SessionContext,
    fetcher: F,
    family: PageFamily,
}

impl<F: Fetcher> Crawler<F> {
    pub fn new(ctx: SessionContext, fetcher: F, family: PageFamily) -> Self {
        Self {
            ctx,
            fetcher,
            family,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Give the session context (and fetcher) back, e.g. to hand the same
    /// database to the scrape engine.
    pub fn into_inner(self) -> (SessionContext, F) {
        (self.ctx, self.fetcher)
    }

    /// Create a new job seeded with root tasks for `initial_urls`. URLs that
    /// classify to no group are skipped with a warning.
    pub fn initialize(&mut self, initial_urls: &[String]) -> anyhow::Result<()> {
        let family = &self.family;
        self.ctx.run(|session| {
            let job = Job::create(session)?;
            for initial_url in initial_urls {
                let Some(grouped_url) = family.classify(initial_url) else {
                    warn!(url = %initial_url, "initial url mapped to no group");
                    continue;
                };
                Task::add_initial_url(session, &job, &grouped_url, false)?;
            }
            Ok::<_, anyhow::Error>(())
        })
    }

    /// Append root tasks to the oldest finished job, tolerating duplicates.
    /// Used to re-enter a completed traversal with fresh entry points.
    pub fn force_initialize(&mut self, initial_urls: &[String]) -> anyhow::Result<()> {
        let family = &self.family;
        self.ctx.run(|session| {
            let job = Job::select(session, JobState::Finished, JobOrder::Oldest)?;
            let Some(job) = job else {
                bail!("finished tasks not found");
            };
            for initial_url in initial_urls {
                let Some(grouped_url) = family.classify(initial_url) else {
                    warn!(url = %initial_url, "initial url mapped to no group");
                    continue;
                };
                match Task::add_initial_url(session, &job, &grouped_url, true) {
                    Ok(_) => info!(url = %initial_url, "force append initial url success"),
                    Err(StoreError::DuplicateTask) => {
                        warn!(url = %initial_url, "force append initial url failed")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }

    /// Advance the selected unfinished job by one task. Returns `false`
    /// when there is no work left (no unfinished job, or nothing to open).
    pub async fn process_one(&mut self, order: JobOrder) -> anyhow::Result<bool> {
        info!("CRAWLING STEP BEGIN");
        let session = self.ctx.begin()?;

        let Some(job) = Job::select(&session, JobState::Unfinished, order)? else {
            info!("no unfinished job to resume");
            return Ok(false);
        };
        info!(job_id = job.id, "job acquired");

        let fill_count = Task::fill_pages(&session, &job)?;
        info!(fill_count, "page fill");

        let task = Task::open_task(&session, &job)?;
        debug!(?task, "task open");

        let mut crawling_executed = false;
        if let Some(task) = task {
            let current_grouped_url = GroupedUrl {
                url: task.url.clone(),
                group_name: task.group_name.clone(),
            };

            match self.fetcher.open(&task.url).await {
                Ok(content) => {
                    info!(length = content.len(), "content retrieved");

                    let mut new_task_count = 0;
                    for grouped_url in
                        next_grouped_urls(&self.family, &task.url, &content, &current_grouped_url)
                    {
                        let lookup = Lookup::intern(&session, UrlRef::Grouped(&grouped_url))?;
                        let back_lookup = Lookup::intern(&session, UrlRef::Bare(&task.url))?;
                        match Task::new_record(&session, &job, &lookup, &back_lookup) {
                            Ok(_) => new_task_count += 1,
                            Err(StoreError::DuplicateTask) => {
                                debug!(url = %grouped_url.url, "task already recorded")
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    debug!(new_task_count, "new tasks added");

                    Task::close_task(&session, task.id, Some(&content))?;
                }
                Err(e) if e.is_recoverable() => {
                    info!(error = %e, "recoverable failure while retrieving content");
                    Task::close_task(&session, task.id, None)?;
                }
                Err(e) => {
                    return Err(e).context(format!("fetching {}", task.url));
                }
            }
            debug!("task closed");
            crawling_executed = true;
        }

        let summary = crawl_info(&session, &job)?;
        info!(
            tasks_without_content = summary.tasks_without_content,
            tasks_with_content = summary.tasks_with_content,
            pages_in_db = summary.pages_in_db,
            lookup_size = summary.lookup_size,
            crawling_executed,
            "[SUMMARY]"
        );

        session.commit()?;
        info!("CRAWLING STEP END");
        Ok(crawling_executed)
    }

    /// Run steps until the selected job (and any job behind it) is done.
    pub async fn crawl(&mut self, order: JobOrder) -> anyhow::Result<()> {
        loop {
            let crawling_executed = self.process_one(order).await?;
            if !crawling_executed {
                break;
            }
        }
        Ok(())
    }
}

/// Anchors of the fetched document, resolved, classified, deduplicated by
/// canonical URL, and filtered to direct children of the current group.
/// Self-links are dropped.
fn next_grouped_urls(
    family: &PageFamily,
    source_url: &str,
    content: &str,
    current: &GroupedUrl,
) -> Vec<GroupedUrl> {
    let base = match Url::parse(source_url) {
        Ok(base) => base,
        Err(e) => {
            debug!(url = source_url, error = %e, "source url is not absolute; no link expansion");
            return Vec::new();
        }
    };

    let anchor = Selector::parse("a").expect("static selector must parse");
    let html = Html::parse_document(content);

    let mut seen = HashSet::new();
    let mut survivors = Vec::new();
    for element in html.select(&anchor) {
        let Some(href) = element.attr("href") else {
            continue;
        };
        let Ok(full_url) = base.join(href) else {
            continue;
        };
        let Some(grouped_url) = family.classify(full_url.as_str()) else {
            continue;
        };
        if grouped_url.url == current.url {
            continue;
        }
        if !family.is_child_of(&grouped_url, current) {
            continue;
        }
        if seen.insert(grouped_url.url.clone()) {
            survivors.push(grouped_url);
        }
    }
    survivors
}
