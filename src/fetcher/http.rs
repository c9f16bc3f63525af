//! Cookie-backed HTTPS fetcher.
//!
//! Redirects are followed manually so every hop's `Set-Cookie` lands in the
//! persistent jar; the portal's single sign-on sets its session cookies on
//! intermediate responses. The jar is loaded at construction and written
//! back by [`CookieHttpFetcher::close`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use super::cookies::CookieJar;
use super::rate_limit::RateLimiter;
use super::{FetchError, Fetcher};

const USER_AGENT: &str = "Mozilla/4.0 (compatible; MSIE 5.5; Windows NT)";
const MAX_REDIRECTS: usize = 10;

pub(crate) struct FetchedPage {
    pub url: Url,
    pub status: StatusCode,
    pub body: Vec<u8>,
}

pub struct CookieHttpFetcher {
    client: Client,
    limiter: RateLimiter,
    cookie_path: PathBuf,
    pub(crate) jar: Mutex<CookieJar>,
    pub(crate) login_uid: Mutex<Option<String>>,
}

impl CookieHttpFetcher {
    /// Build the fetcher, loading the cookie jar from `cookie_path`.
    pub fn open_file(cookie_path: impl Into<PathBuf>, limiter: RateLimiter) -> Result<Self, FetchError> {
        let cookie_path = cookie_path.into();
        let jar = CookieJar::load(&cookie_path)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            limiter,
            cookie_path,
            jar: Mutex::new(jar),
            login_uid: Mutex::new(None),
        })
    }

    /// One logical request: rate-limited, cookies attached per hop,
    /// redirects followed up to a fixed depth.
    pub(crate) async fn fetch(
        &self,
        method: Method,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<FetchedPage, FetchError> {
        let mut current = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        info!(%current, "urlopen");
        self.limiter.block(current.as_str()).await;

        let mut method = method;
        let mut form = form.map(|pairs| pairs.to_vec());

        for _ in 0..MAX_REDIRECTS {
            let mut request = self.client.request(method.clone(), current.clone());
            if let Some(header) = self.jar.lock().await.header_for(&current) {
                request = request.header(reqwest::header::COOKIE, header);
            }
            if let Some(pairs) = &form {
                request = request.form(pairs.as_slice());
            }

            let response = request.send().await?;
            let status = response.status();

            {
                let mut jar = self.jar.lock().await;
                for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
                    if let Ok(text) = value.to_str() {
                        jar.store(&current, text);
                    }
                }
            }

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| FetchError::Http {
                        url: current.to_string(),
                        status: status.as_u16(),
                    })?;
                let next = current.join(location).map_err(|source| FetchError::InvalidUrl {
                    url: location.to_string(),
                    source,
                })?;
                debug!(from = %current, to = %next, "following redirect");
                current = next;
                // Redirected requests replay as plain GETs.
                method = Method::GET;
                form = None;
                continue;
            }

            let body = response.bytes().await?.to_vec();
            return Ok(FetchedPage {
                url: current,
                status,
                body,
            });
        }

        Err(FetchError::TooManyRedirects(current.to_string()))
    }

    /// Persist the cookie jar and log out of the portal session.
    pub async fn close(&self) -> Result<(), FetchError> {
        self.logout().await?;
        self.jar.lock().await.save(&self.cookie_path)?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl Fetcher for CookieHttpFetcher {
    async fn open_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let page = self.fetch(Method::GET, url, None).await?;
        if page.status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !page.status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: page.status.as_u16(),
            });
        }
        Ok(page.body)
    }
}
