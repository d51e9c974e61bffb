//! HTTP client for the monitoring service's session API.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ctgwatch::session::{HttpSessionApi, SessionApi};
//! use ctgwatch::StartSessionRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = HttpSessionApi::builder()
//!         .base_url("http://localhost:8080/api/v1")
//!         .build()?;
//!
//!     let session = api
//!         .start_session(&StartSessionRequest {
//!             device_id: "ctg-01".into(),
//!             card_id: "11111111-1111-1111-1111-111111111111".into(),
//!         })
//!         .await?;
//!     println!("started {}", session.session_id);
//!
//!     api.stop_session(&session.session_id).await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{ApiErrorBody, Session, SessionEnvelope, SessionList, StartSessionRequest};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1";

/// Session operations the manager depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// `POST /sessions/start`.
    async fn start_session(&self, request: &StartSessionRequest) -> Result<Session>;

    /// `POST /sessions/stop/{session_id}`.
    async fn stop_session(&self, session_id: &str) -> Result<Session>;

    /// `GET /sessions/active`.
    async fn active_sessions(&self) -> Result<Vec<Session>>;
}

/// reqwest-backed [`SessionApi`].
#[derive(Debug, Clone)]
pub struct HttpSessionApi {
    client: Client,
    base_url: String,
}

impl HttpSessionApi {
    /// Create a new builder for configuring the client.
    pub fn builder() -> HttpSessionApiBuilder {
        HttpSessionApiBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /sessions/{session_id}`.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let url = self.url(&format!("/sessions/{}", encode_segment(session_id)));
        let response = self.client.get(&url).send().await?;
        let envelope: serde_json::Value = parse_body(response).await?;
        session_from_value(envelope)
    }

    /// `GET /cards/{card_id}/sessions`, most recent first as returned.
    pub async fn card_sessions(&self, card_id: &str) -> Result<Vec<Session>> {
        let url = self.url(&format!("/cards/{}/sessions", encode_segment(card_id)));
        let response = self.client.get(&url).send().await?;
        let list: SessionList = parse_body(response).await?;
        Ok(list.sessions)
    }

    /// `GET /monitoring/health`. The body shape is owned by the service.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = self.url("/monitoring/health");
        let response = self.client.get(&url).send().await?;
        parse_body(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<Session> {
        let url = self.url("/sessions/start");
        debug!(%url, card_id = %request.card_id, "starting session");

        let response = self.client.post(&url).json(request).send().await?;
        let body: serde_json::Value = parse_body(response).await?;
        session_from_value(body)
    }

    async fn stop_session(&self, session_id: &str) -> Result<Session> {
        let url = self.url(&format!("/sessions/stop/{}", encode_segment(session_id)));
        debug!(%url, "stopping session");

        let response = self.client.post(&url).send().await?;
        let body: serde_json::Value = parse_body(response).await?;
        session_from_value(body)
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        let url = self.url("/sessions/active");
        let response = self.client.get(&url).send().await?;
        let list: SessionList = parse_body(response).await?;
        Ok(list.sessions)
    }
}

/// Builder for [`HttpSessionApi`].
#[derive(Debug, Default)]
pub struct HttpSessionApiBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    client: Option<Client>,
}

impl HttpSessionApiBuilder {
    /// Set the API base URL (default: "http://localhost:8080/api/v1").
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use an existing HTTP client. The timeout setting is then ignored.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<HttpSessionApi> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.timeout.unwrap_or(Duration::from_secs(10)))
                .build()
                .map_err(|e| Error::Http(e.to_string()))?,
        };

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(HttpSessionApi { client, base_url })
    }
}

/// Decode a success body or turn an error body into [`Error::Backend`].
async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(backend_error(status.as_u16(), status.canonical_reason(), &text));
    }

    serde_json::from_str(&text).map_err(|e| Error::Parse(e.to_string()))
}

fn backend_error(status: u16, reason: Option<&str>, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_else(|| match reason {
            Some(reason) => format!("{} {}", status, reason),
            None => format!("request failed with status {}", status),
        });
    Error::Backend { status, message }
}

/// Accepts `{"session": ..}`, `{"data": ..}` or a bare session record.
fn session_from_value(value: serde_json::Value) -> Result<Session> {
    let is_wrapped = value
        .as_object()
        .is_some_and(|o| o.contains_key("session") || o.contains_key("data"));

    if is_wrapped {
        let envelope: SessionEnvelope = serde_json::from_value(value)?;
        envelope
            .session
            .ok_or_else(|| Error::Parse("response did not include a session".into()))
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

// Session and card ids are UUIDs in practice; keep path separators out anyway.
fn encode_segment(s: &str) -> String {
    s.trim().replace('/', "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r#"{
        "session_id": "5f0c9a7e-0000-4000-8000-000000000001",
        "card_id": "11111111-1111-1111-1111-111111111111",
        "device_id": "ctg-01",
        "status": "active",
        "start_time": "2024-05-01T10:00:00Z",
        "duration": 0
    }"#;

    #[test]
    fn test_builder_defaults() {
        let api = HttpSessionApi::builder().build().unwrap();
        assert_eq!(api.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let api = HttpSessionApi::builder()
            .base_url("http://ctg.local/api/v1/")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(api.base_url(), "http://ctg.local/api/v1");
        assert_eq!(api.url("/sessions/active"), "http://ctg.local/api/v1/sessions/active");
    }

    #[test]
    fn test_backend_error_prefers_details() {
        let err = backend_error(
            409,
            Some("Conflict"),
            r#"{"error":"Failed to start session","details":"device ctg-01 is busy"}"#,
        );
        assert_eq!(
            err,
            Error::Backend {
                status: 409,
                message: "device ctg-01 is busy".into()
            }
        );
        assert_eq!(err.to_string(), "device ctg-01 is busy");
    }

    #[test]
    fn test_backend_error_falls_back_to_error_then_status() {
        let err = backend_error(400, Some("Bad Request"), r#"{"error":"Invalid request body"}"#);
        assert_eq!(err.to_string(), "Invalid request body");

        let err = backend_error(502, Some("Bad Gateway"), "<html>upstream down</html>");
        assert_eq!(err.to_string(), "502 Bad Gateway");

        let err = backend_error(599, None, "");
        assert_eq!(err.to_string(), "request failed with status 599");
    }

    #[test]
    fn test_session_from_wrapped_and_bare_bodies() {
        let wrapped: serde_json::Value =
            serde_json::from_str(&format!(r#"{{"message":"Session started","session":{}}}"#, SESSION))
                .unwrap();
        let proxied: serde_json::Value =
            serde_json::from_str(&format!(r#"{{"data":{}}}"#, SESSION)).unwrap();
        let bare: serde_json::Value = serde_json::from_str(SESSION).unwrap();

        for body in [wrapped, proxied, bare] {
            let session = session_from_value(body).unwrap();
            assert_eq!(session.device_id, "ctg-01");
        }
    }

    #[test]
    fn test_session_from_empty_envelope_is_parse_error() {
        let body = serde_json::json!({ "session": null });
        assert!(matches!(session_from_value(body), Err(Error::Parse(_))));
    }

    /// Serve one HTTP response on a local port and return the base URL plus
    /// the request line that was received.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            let request = String::from_utf8_lossy(&request).to_string();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{}/api/v1", addr), server)
    }

    #[tokio::test]
    async fn test_get_session_requests_session_path() {
        let (base_url, server) =
            serve_once("200 OK", format!(r#"{{"session":{}}}"#, SESSION)).await;
        let api = HttpSessionApi::builder().base_url(base_url).build().unwrap();

        let session = api
            .get_session("5f0c9a7e-0000-4000-8000-000000000001")
            .await
            .unwrap();
        assert_eq!(session.card_id, "11111111-1111-1111-1111-111111111111");
        assert!(session.is_active());

        let request_line = server.await.unwrap();
        assert_eq!(
            request_line,
            "GET /api/v1/sessions/5f0c9a7e-0000-4000-8000-000000000001 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_get_session_not_found_is_backend_error() {
        let (base_url, server) =
            serve_once("404 Not Found", r#"{"error":"Session not found"}"#.to_string()).await;
        let api = HttpSessionApi::builder().base_url(base_url).build().unwrap();

        let err = api.get_session("missing").await.unwrap_err();
        assert_eq!(
            err,
            Error::Backend {
                status: 404,
                message: "Session not found".into()
            }
        );
        server.await.unwrap();
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment(" abc "), "abc");
        assert_eq!(encode_segment("a/b"), "a%2Fb");
    }
}
