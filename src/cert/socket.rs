//! TCP credential exchange: a UTF-8 domain request in, a JSON `(uid,
//! password)` pair out, empty payload when the domain is unknown. Intended
//! for localhost only.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use super::{CertError, CertPair, CertProvider};

pub const DEFAULT_CERT_HOST: &str = "127.0.0.1";
pub const DEFAULT_CERT_PORT: u16 = 9876;

pub struct SocketCertProvider {
    host: String,
    port: u16,
}

impl SocketCertProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for SocketCertProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CERT_HOST, DEFAULT_CERT_PORT)
    }
}

#[async_trait]
impl CertProvider for SocketCertProvider {
    async fn request(&self, domain: &str) -> Result<CertPair, CertError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(domain.as_bytes()).await?;
        stream.shutdown().await?;

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await?;
        if received.is_empty() {
            return Err(CertError::UnknownDomain(domain.to_string()));
        }
        Ok(serde_json::from_slice(&received)?)
    }
}

/// Accept connections until the process is killed, answering each with the
/// pair for the requested domain (or nothing).
pub async fn serve_forever(
    host: &str,
    port: u16,
    pairs: HashMap<String, CertPair>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!(host, port, "serve forever");
    loop {
        let (stream, address) = listener.accept().await?;
        info!(%address, "accepted");
        if let Err(e) = answer(stream, &pairs).await {
            tracing::warn!(%address, error = %e, "cert request failed");
        }
        info!(%address, "connection closed");
    }
}

async fn answer(mut stream: TcpStream, pairs: &HashMap<String, CertPair>) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let read = stream.read(&mut buffer).await?;
    let domain = String::from_utf8_lossy(&buffer[..read]).trim().to_string();

    if let Some(pair) = pairs.get(&domain) {
        let payload = serde_json::to_vec(pair)?;
        stream.write_all(&payload).await?;
    }
    stream.shutdown().await?;
    Ok(())
}
