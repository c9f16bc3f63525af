//! Credential server: holds a uid/password pair in memory and serves it to
//! the other workers over a localhost socket.

use std::collections::HashMap;
use std::io::Write;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manaba_clone::cert::{serve_forever, CertPair, DEFAULT_CERT_HOST, DEFAULT_CERT_PORT};
use manaba_clone::family::manaba::CERT_DOMAIN;

#[derive(Parser)]
#[command(name = "cert-server")]
#[command(about = "Serve login credentials to local workers")]
struct Args {
    /// Address to listen on (keep this on localhost)
    #[arg(long, default_value = DEFAULT_CERT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_CERT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manaba_clone=info,cert_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    print!("uid? > ");
    std::io::stdout().flush()?;
    let mut uid = String::new();
    std::io::stdin().read_line(&mut uid)?;
    let uid = uid.trim().to_string();

    let term = console::Term::stdout();
    term.write_str("pw? > ")?;
    let password = term.read_secure_line()?;

    let mut pairs = HashMap::new();
    pairs.insert(CERT_DOMAIN.to_string(), CertPair { uid, password });

    serve_forever(&args.host, args.port, pairs).await?;
    Ok(())
}
