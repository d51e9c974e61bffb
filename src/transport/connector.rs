//! Connectors produce the raw byte stream behind a stream handle.

use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;

use crate::error::{Error, Result};
use crate::model::ApiErrorBody;

use super::StreamParams;

/// Chunks of an event-stream body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Establishes the underlying connection for a stream handle.
///
/// Implementations make exactly one connection attempt per call.
#[async_trait]
pub trait StreamConnector: Send + Sync + Debug {
    /// Connect and return the response body as a byte stream.
    async fn connect(&self, params: &StreamParams) -> Result<ByteStream>;

    /// Returns a human-readable description of the endpoint.
    fn description(&self) -> String;
}

/// Connects to the SSE endpoint over HTTP.
///
/// Issues `GET <url>?device_id=<device>&card_id=<subject>` with
/// `Accept: text/event-stream`.
#[derive(Debug, Clone)]
pub struct HttpStreamConnector {
    client: Client,
    url: String,
}

impl HttpStreamConnector {
    /// Create a connector for the given stream URL.
    ///
    /// The client must not carry a total request timeout, since the
    /// response body stays open for the whole session.
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn query(params: &StreamParams) -> Vec<(&'static str, String)> {
        let mut query = Vec::with_capacity(2);
        if let Some(ref device_id) = params.device_id {
            query.push(("device_id", device_id.clone()));
        }
        query.push(("card_id", params.subject_id.trim().to_string()));
        query
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn connect(&self, params: &StreamParams) -> Result<ByteStream> {
        let response = self
            .client
            .get(&self.url)
            .query(&Self::query(params))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: ApiErrorBody = response.json().await.unwrap_or_default();
            let message = body
                .message()
                .unwrap_or_else(|| format!("stream endpoint returned status {}", status));
            return Err(Error::Transport(message));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| Error::Transport(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    fn description(&self) -> String {
        self.url.clone()
    }
}
