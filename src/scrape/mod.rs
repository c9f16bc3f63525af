//! Scrape engine: roots-first walk over a job's persisted task graph.
//!
//! Each page group maps to a handler: an extractor persisting a typed
//! record, or `Ignore`, which contributes nothing but lets traversal
//! continue through the page. Extractors wire their parent foreign key to
//! the nearest ancestor entry of the type they need, carried down the walk
//! on an immutable parent stack. The walk itself is iterative (an explicit
//! work list) so graph depth never exhausts the call stack.

pub mod extractors;

use std::collections::HashMap;

use anyhow::Context;
use tracing::{debug, info};

use crate::repository::crawl::{Job, JobOrder, JobState, Task, TaskRecord};
use crate::repository::{Session, SessionContext};

/// The scraper tables an entry can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Course,
    CourseNews,
    CourseContentsPageList,
    CourseContentsPage,
}

/// Reference to a persisted scraper entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentEntry {
    pub kind: EntryKind,
    pub id: i64,
}

/// Immutable stack of ancestor entries along the current walk path.
/// Pushing yields a new stack; lookups scan from the top.
#[derive(Debug, Clone, Default)]
pub struct ParentStack(Vec<ParentEntry>);

impl ParentStack {
    pub fn push(&self, entry: ParentEntry) -> ParentStack {
        let mut entries = self.0.clone();
        entries.push(entry);
        ParentStack(entries)
    }

    /// Nearest ancestor of the requested kind.
    pub fn nearest(&self, kind: EntryKind) -> Option<i64> {
        self.0
            .iter()
            .rev()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.id)
    }
}

/// Persist whatever the group's page carries. Returning `None` leaves the
/// parent stack unchanged for the subtree.
pub trait Extractor {
    fn extract(
        &self,
        session: &Session,
        task: &TaskRecord,
        parents: &ParentStack,
    ) -> anyhow::Result<Option<ParentEntry>>;
}

pub enum GroupHandler {
    Ignore,
    Extract(Box<dyn Extractor>),
}

pub struct Scraper {
    ctx: SessionContext,
    handlers: HashMap<String, GroupHandler>,
    active_job_id: Option<i64>,
    max_process_count: Option<usize>,
}

impl Scraper {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            handlers: HashMap::new(),
            active_job_id: None,
            max_process_count: None,
        }
    }

    pub fn register(&mut self, group_name: &str, handler: GroupHandler) {
        self.handlers.insert(group_name.to_string(), handler);
    }

    /// Give the session context back once the walk is done.
    pub fn into_inner(self) -> SessionContext {
        self.ctx
    }

    /// Stop enqueueing children once this many tasks have been handled.
    pub fn with_max_process_count(mut self, max: Option<usize>) -> Self {
        self.max_process_count = max;
        self
    }

    /// Select which job's task graph to walk.
    pub fn set_active_job(&mut self, state: JobState, order: JobOrder) -> anyhow::Result<i64> {
        let (job, group_names) = self.ctx.run(|session| {
            let job = Job::select(session, state, order)?;
            let group_names = match &job {
                Some(job) => Task::list_group_names(session, job.id)?,
                None => Vec::new(),
            };
            Ok::<_, crate::repository::StoreError>((job, group_names))
        })?;
        let job = job.context("no job matches the requested state")?;
        info!(job_id = job.id, ?group_names, "active job selected");
        self.active_job_id = Some(job.id);
        Ok(job.id)
    }

    /// Clear every scraper table ahead of a fresh walk.
    pub fn reset_database(&mut self) -> anyhow::Result<()> {
        self.ctx
            .run(crate::repository::scrape::reset_scraper_tables)?;
        Ok(())
    }

    /// Walk the active job from its root tasks, dispatching per group.
    pub fn scrape_all(&mut self) -> anyhow::Result<()> {
        let job_id = self.active_job_id.context("active job not selected")?;
        let handlers = &self.handlers;
        let max_process_count = self.max_process_count;

        self.ctx.run(|session| {
            let mut work: Vec<(TaskRecord, ParentStack)> = Task::iter_roots(session, job_id)?
                .into_iter()
                .rev()
                .map(|task| (task, ParentStack::default()))
                .collect();

            let mut process_count = 0usize;
            while let Some((task, parents)) = work.pop() {
                let entry = handle_task(handlers, session, &task, &parents)?;
                process_count += 1;

                if let Some(max) = max_process_count {
                    if process_count >= max {
                        continue;
                    }
                }

                let next_parents = match entry {
                    Some(entry) => parents.push(entry),
                    None => parents,
                };
                for child in Task::iter_next(session, &task)?.into_iter().rev() {
                    work.push((child, next_parents.clone()));
                }
            }
            info!(process_count, "scrape walk finished");
            Ok(())
        })
    }
}

fn handle_task(
    handlers: &HashMap<String, GroupHandler>,
    session: &Session,
    task: &TaskRecord,
    parents: &ParentStack,
) -> anyhow::Result<Option<ParentEntry>> {
    let Some(group_name) = task.group_name.as_deref() else {
        debug!(url = %task.url, "IGNORED (no group)");
        return Ok(None);
    };
    match handlers.get(group_name) {
        Some(GroupHandler::Extract(extractor)) => {
            info!(group_name, url = %task.url, "ACCEPTED");
            extractor
                .extract(session, task, parents)
                .with_context(|| format!("extracting {group_name} from {}", task.url))
        }
        Some(GroupHandler::Ignore) | None => {
            info!(group_name, url = %task.url, "IGNORED");
            Ok(None)
        }
    }
}
