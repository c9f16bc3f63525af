//! Pluggable URL openers consumed by the crawl and download engines.
//!
//! Three implementations: [`CookieHttpFetcher`] for the authenticated
//! portal, [`MemoryFetcher`] for tests and [`DiskFetcher`] for replaying a
//! saved site. `NotFound` and HTTP-status failures are recoverable for the
//! engines (the task closes with null content); everything else is fatal
//! for the current step.

mod cookies;
mod disk;
mod http;
mod memory;
mod rate_limit;
mod sso;

pub use cookies::{CookieJar, LwpCookie};
pub use disk::DiskFetcher;
pub use http::CookieHttpFetcher;
pub use memory::MemoryFetcher;
pub use rate_limit::RateLimiter;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("http status {status} for {url}")]
    Http { url: String, status: u16 },
    #[error("too many redirects for {0}")]
    TooManyRedirects(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("login failed: {0}")]
    Login(String),
    #[error("incorrect cert")]
    IncorrectCert,
}

impl FetchError {
    /// Recoverable failures close the current task with null content;
    /// anything else aborts (and rolls back) the step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FetchError::NotFound(_) | FetchError::Http { .. } | FetchError::TooManyRedirects(_)
        )
    }
}

#[async_trait(?Send)]
pub trait Fetcher {
    async fn open_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    async fn open(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.open_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
