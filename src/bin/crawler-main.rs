//! Crawler worker: logs in through the credential server and advances the
//! crawl one task at a time until the job is finished.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manaba_clone::cert::{SocketCertProvider, DEFAULT_CERT_HOST, DEFAULT_CERT_PORT};
use manaba_clone::crawl::Crawler;
use manaba_clone::env::Env;
use manaba_clone::family::manaba::{home_urls, manaba_family, Period};
use manaba_clone::fetcher::{CookieHttpFetcher, RateLimiter};
use manaba_clone::repository::crawl::JobOrder;
use manaba_clone::repository::{Dsn, SessionContext};

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
#[command(name = "crawler-main")]
#[command(about = "Crawl the course portal into the local database")]
struct Args {
    /// Database file or connection string
    #[arg(long, default_value = "db/database.db")]
    database: String,

    /// Cookie jar file (LWP format)
    #[arg(long, default_value = "cookie.txt")]
    cookie_file: PathBuf,

    /// Which unfinished job to resume
    #[arg(long, value_enum, default_value = "latest")]
    resume: ResumeOrder,

    /// Credential server address
    #[arg(long, default_value = DEFAULT_CERT_HOST)]
    cert_host: String,

    /// Credential server port
    #[arg(long, default_value_t = DEFAULT_CERT_PORT)]
    cert_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manaba_clone=info,crawler_main=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("crawler main");
    let args = Args::parse();
    let env = Env::load()?;

    print!("new session [y/n] > ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let create_new_session = answer.trim().eq_ignore_ascii_case("y");
    info!(create_new_session);

    let certs = SocketCertProvider::new(args.cert_host.clone(), args.cert_port);
    let fetcher = CookieHttpFetcher::open_file(
        &args.cookie_file,
        RateLimiter::from_secs(env.crawler_sleep_seconds),
    )?;
    fetcher.login(&certs).await?;

    let ctx = SessionContext::open(&Dsn::parse(&args.database)?)?;
    let mut crawler = Crawler::new(ctx, fetcher, manaba_family()?);

    if create_new_session {
        crawler.initialize(&home_urls(&Period::ALL))?;
    }

    let result = crawler.crawl(args.resume.into()).await;
    crawler.fetcher().close().await?;
    result
}
