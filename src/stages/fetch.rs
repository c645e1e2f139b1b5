//! Source downloads for the ingest stage.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument};

/// User name sent with a non-empty source token.
pub const TOKEN_AUTH_USER: &str = "apikey";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download of {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no source registered for {0}")]
    Unknown(String),
}

/// Downloads a remote dataset.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `url`; a non-empty `token` is sent as basic auth with user [`TOKEN_AUTH_USER`].
    async fn fetch(&self, url: &str, token: Option<&str>) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    #[instrument(skip(self, token))]
    async fn fetch(&self, url: &str, token: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let http = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };

        let mut request = self.client.get(url);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.basic_auth(TOKEN_AUTH_USER, Some(token));
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http)?;
        let body = response.bytes().await.map_err(http)?;

        debug!(bytes = body.len(), "source downloaded");
        Ok(body.to_vec())
    }
}

/// Serves registered payloads by URL and records the tokens it was given.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    sources: HashMap<String, Vec<u8>>,
    seen_tokens: Mutex<Vec<Option<String>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.sources.insert(url.into(), body.into());
        self
    }

    pub fn seen_tokens(&self) -> Vec<Option<String>> {
        self.seen_tokens.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, token: Option<&str>) -> Result<Vec<u8>, FetchError> {
        if let Ok(mut seen) = self.seen_tokens.lock() {
            seen.push(token.map(str::to_string));
        }
        self.sources
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Unknown(url.to_string()))
    }
}
