//! Local-disk fetcher for replaying a previously saved site.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::{FetchError, Fetcher};

/// Resolves URLs to files beneath a root directory. Absolute URLs map to
/// `<root>/<host>/<path>`; anything else is joined onto the root as-is.
#[derive(Debug)]
pub struct DiskFetcher {
    root: PathBuf,
}

impl DiskFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                let mut path = self.root.join(host);
                for segment in parsed.path().split('/').filter(|s| !s.is_empty()) {
                    path.push(segment);
                }
                return path;
            }
        }
        self.root.join(url.trim_start_matches('/'))
    }
}

#[async_trait(?Send)]
impl Fetcher for DiskFetcher {
    async fn open_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        info!(url, "urlopen");
        let path = self.path_for(url);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(url.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
