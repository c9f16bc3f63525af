//! Per-host minimum-delay rate limiter.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Minimum wait even for the first request to a host.
const MIN_BLOCK: Duration = Duration::from_millis(100);

/// Blocks until at least the configured delay has elapsed since the
/// previous release for the same host. Release times are in-memory and
/// process-local; the clock is tokio's, so paused-time tests control it.
#[derive(Debug)]
pub struct RateLimiter {
    sleep: Duration,
    last_release: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(sleep: Duration) -> Self {
        debug!(?sleep, "rate limiter initialized");
        Self {
            sleep,
            last_release: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_secs(sleep_seconds: u64) -> Self {
        Self::new(Duration::from_secs(sleep_seconds))
    }

    fn host_of(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
            .unwrap_or_default()
    }

    /// Sleep long enough to honor the per-host delay, then record the
    /// release time for the host.
    pub async fn block(&self, url: &str) {
        let host = Self::host_of(url);

        let required = {
            let released = self.last_release.lock().await;
            match released.get(&host) {
                Some(last) => {
                    let elapsed = Instant::now().saturating_duration_since(*last);
                    self.sleep.saturating_sub(elapsed).max(MIN_BLOCK)
                }
                None => MIN_BLOCK,
            }
        };

        debug!(host, ?required, "blocking for rate limit");
        tokio::time::sleep(required).await;

        self.last_release
            .lock()
            .await
            .insert(host, Instant::now());
    }
}
