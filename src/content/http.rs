//! HTTP content store backed by `reqwest`

use super::ContentStore;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Fetches `GET {base}/{section}` and parses the body as JSON.
///
/// A 404 or an empty body is an absent section (`null`); any other non-2xx
/// status is an error.
pub struct HttpContentStore {
    client: Client,
    base: Url,
}

impl HttpContentStore {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::ConfigError(format!("invalid content base URL '{}': {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::NetworkError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    fn section_url(&self, section: &str) -> Result<Url> {
        self.base
            .join(section)
            .map_err(|e| Error::ConfigError(format!("invalid section name '{}': {}", section, e)))
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn fetch_section(&self, section: &str) -> Result<Value> {
        let url = self.section_url(section)?;
        let res = self.client.get(url.clone()).send().await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            return Err(Error::NetworkError(format!("GET {} returned {}", url, status)));
        }
        let body = res.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| Error::NetworkError(format!("GET {} returned invalid JSON: {}", url, e)))
    }
}
