//! HTTP client for the clipboard API.

use std::future::Future;
use std::time::Duration;

use crate::api::{SaveRequest, SaveResponse};
use crate::error::ClientError;
use crate::model::{ClipboardId, ClipboardRecord, now_millis};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a session reads and writes its clipboard.
pub trait Remote: Send + Sync + 'static {
    fn fetch(&self, id: &ClipboardId) -> impl Future<Output = Result<ClipboardRecord, ClientError>> + Send;

    /// Writes `content` and returns the timestamp the write was recorded at.
    fn save(&self, id: &ClipboardId, content: &str) -> impl Future<Output = Result<i64, ClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ClipboardClient {
    base_url: String,
    http: reqwest::Client,
}

impl ClipboardClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(ClipboardClient {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/api/clipboard", self.base_url)
    }
}

impl Remote for ClipboardClient {
    async fn fetch(&self, id: &ClipboardId) -> Result<ClipboardRecord, ClientError> {
        let url = format!("{}?id={}", self.endpoint(), urlencoding::encode(id.as_str()));
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }
        Ok(response.json::<ClipboardRecord>().await?)
    }

    async fn save(&self, id: &ClipboardId, content: &str) -> Result<i64, ClientError> {
        let body = SaveRequest {
            content: content.to_owned(),
            id: Some(id.as_str().to_owned()),
        };
        let response = self.http.post(self.endpoint()).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        let saved = response.json::<SaveResponse>().await?;
        Ok(saved.timestamp.unwrap_or_else(now_millis))
    }
}
