//! Login credential providers.
//!
//! Credentials never live in the crawler's own configuration: they come
//! from a JSON file or, preferably, from a small localhost socket server
//! (`cert-server`) that holds them in memory for the duration of a run.

mod json;
mod socket;

pub use json::JsonCertProvider;
pub use socket::{serve_forever, SocketCertProvider, DEFAULT_CERT_HOST, DEFAULT_CERT_PORT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `(uid, password)` pair for one login domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertPair {
    pub uid: String,
    pub password: String,
}

#[derive(Error, Debug)]
pub enum CertError {
    #[error("invalid domain for cert request: {0}")]
    UnknownDomain(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cert payload: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait CertProvider: Send + Sync {
    async fn request(&self, domain: &str) -> Result<CertPair, CertError>;
}
