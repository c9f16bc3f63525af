//! Scraper worker: walks a completed crawl job and persists typed course
//! records.

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manaba_clone::repository::crawl::{JobOrder, JobState};
use manaba_clone::repository::{Dsn, SessionContext};
use manaba_clone::scrape::extractors::manaba_scraper;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResumeOrder {
    Latest,
    Oldest,
}

impl From<ResumeOrder> for JobOrder {
    fn from(order: ResumeOrder) -> JobOrder {
        match order {
            ResumeOrder::Latest => JobOrder::Latest,
            ResumeOrder::Oldest => JobOrder::Oldest,
        }
    }
}

#[derive(Parser)]
#[command(name = "scraper-main")]
#[command(about = "Extract course records from a finished crawl job")]
struct Args {
    /// Database file or connection string
    #[arg(long, default_value = "db/database.db")]
    database: String,

    /// Which finished job to scrape
    #[arg(long, value_enum, default_value = "oldest")]
    order: ResumeOrder,

    /// Clear the scraper tables before walking
    #[arg(long)]
    reset: bool,

    /// Stop descending after this many handled tasks
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manaba_clone=info,scraper_main=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("scraper main");
    let args = Args::parse();

    let ctx = SessionContext::open(&Dsn::parse(&args.database)?)?;
    let mut scraper = manaba_scraper(ctx).with_max_process_count(args.limit);

    scraper.set_active_job(JobState::Finished, args.order.into())?;

    if args.reset {
        scraper.reset_database()?;
    }
    scraper.scrape_all()
}
