//! Downloader worker: fetches the attachments referenced by scraped
//! bodies.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manaba_clone::cert::{SocketCertProvider, DEFAULT_CERT_HOST, DEFAULT_CERT_PORT};
use manaba_clone::download::AttachmentDownloader;
use manaba_clone::env::Env;
use manaba_clone::fetcher::{CookieHttpFetcher, RateLimiter};
use manaba_clone::repository::{Dsn, SessionContext};

#[derive(Parser)]
#[command(name = "downloader-main")]
#[command(about = "Download attachments referenced by scraped pages")]
struct Args {
    /// Database file or connection string
    #[arg(long, default_value = "db/database.db")]
    database: String,

    /// Cookie jar file (LWP format)
    #[arg(long, default_value = "cookie.txt")]
    cookie_file: PathBuf,

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
                .unwrap_or_else(|_| "manaba_clone=info,downloader_main=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("downloader main");
    let args = Args::parse();
    let env = Env::load()?;

    let certs = SocketCertProvider::new(args.cert_host.clone(), args.cert_port);
    let fetcher = CookieHttpFetcher::open_file(
        &args.cookie_file,
        RateLimiter::from_secs(env.downloader_sleep_seconds),
    )?;
    fetcher.login(&certs).await?;

    let ctx = SessionContext::open(&Dsn::parse(&args.database)?)?;
    let mut downloader = AttachmentDownloader::new(ctx, fetcher);

    let result = downloader.download_all().await;
    downloader.fetcher().close().await?;
    result
}
