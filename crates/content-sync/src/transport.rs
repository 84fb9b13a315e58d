//! Network transports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use content_core::{ByteProgress, ContentError, RemoteConfig, Result, Transport};

/// HTTP transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from the remote configuration.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ContentError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ContentError::transport(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ContentError::transport(url, format!("Failed to read response: {}", e)))?;

        Ok(bytes.to_vec())
    }

    async fn download(&self, url: &str, dest: &Path, on_bytes: ByteProgress<'_>) -> Result<()> {
        let mut response = self.send(url).await?;
        let total = response.content_length();

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ContentError::transport(url, e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_bytes(written, total);
        }

        file.flush().await?;
        debug!("Downloaded {} bytes from {}", written, url);
        Ok(())
    }
}

/// In-memory transport serving canned responses.
///
/// Unknown URLs fail with a transport error. Every request is counted, so
/// tests can assert that no network traffic happened.
#[derive(Default)]
pub struct MemoryTransport {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`, replacing any previous response.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.into(), body.into());
        }
    }

    /// Stop serving `url`.
    pub fn remove(&self, url: &str) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.remove(url);
        }
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of requests made for `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|requested| *requested == url).count()
    }

    fn respond(&self, url: &str) -> Result<Vec<u8>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        let responses = self
            .responses
            .lock()
            .map_err(|e| ContentError::internal(e.to_string()))?;

        responses
            .get(url)
            .cloned()
            .ok_or_else(|| ContentError::transport(url, "no response registered"))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.respond(url)
    }

    async fn download(&self, url: &str, dest: &Path, on_bytes: ByteProgress<'_>) -> Result<()> {
        let body = self.respond(url)?;
        let total = body.len() as u64;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        // Report in a few steps like a real stream would
        let step = (body.len() / 4).max(1);
        for chunk in body.chunks(step) {
            file.write_all(chunk).await?;
            written += chunk.len() as u64;
            on_bytes(written, Some(total));
        }

        file.flush().await?;
        Ok(())
    }
}
