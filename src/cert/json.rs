//! Credentials from a JSON file mapping `domain → {uid, pw}`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{CertError, CertPair, CertProvider};

#[derive(Debug, Deserialize)]
struct FileEntry {
    uid: String,
    pw: String,
}

pub struct JsonCertProvider {
    entries: HashMap<String, FileEntry>,
}

impl JsonCertProvider {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CertError> {
        let text = std::fs::read_to_string(path)?;
        let entries = serde_json::from_str(&text)?;
        Ok(Self { entries })
    }
}

#[async_trait]
impl CertProvider for JsonCertProvider {
    async fn request(&self, domain: &str) -> Result<CertPair, CertError> {
        let entry = self
            .entries
            .get(domain)
            .ok_or_else(|| CertError::UnknownDomain(domain.to_string()))?;
        Ok(CertPair {
            uid: entry.uid.clone(),
            password: entry.pw.clone(),
        })
    }
}
