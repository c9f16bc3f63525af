//! In-memory fetcher for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use super::{FetchError, Fetcher};

/// Serves a fixed URL → body mapping; unknown URLs are `NotFound`.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new(files: HashMap<String, Vec<u8>>) -> Self {
        Self { files }
    }

    pub fn from_texts<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                .collect(),
        }
    }

    pub fn insert(&mut self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.insert(url.to_string(), body.into());
    }
}

#[async_trait(?Send)]
impl Fetcher for MemoryFetcher {
    async fn open_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        info!(url, "urlopen");
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
