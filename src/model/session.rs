//! Session records and the request/response bodies of the session API.
//!
//! These types match the JSON produced by the CTG monitoring service's REST
//! API (`/sessions/start`, `/sessions/stop/{id}`, `/sessions/active`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Lifecycle status of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

/// One monitoring run, tied to a medical card and a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Subject identifier (medical card UUID).
    pub card_id: String,
    pub device_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in whole seconds as reported by the backend.
    #[serde(default)]
    pub duration: i64,
}

impl Session {
    /// Returns true while the session has not been stopped.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Seconds elapsed since the session started, measured at `now`.
    ///
    /// Uses the end time for stopped sessions.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_seconds().max(0)
    }
}

/// Body of `POST /sessions/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub device_id: String,
    pub card_id: String,
}

/// Error body returned by the backend on non-success responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl ApiErrorBody {
    /// The message to show the user: `details` wins over `error`.
    pub fn message(&self) -> Option<String> {
        self.details.clone().or_else(|| self.error.clone())
    }
}

/// Success body of start/stop.
///
/// The REST service wraps the record in `session`, the web proxy in `data`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SessionEnvelope {
    #[serde(alias = "data")]
    pub session: Option<Session>,
}

/// Body of `GET /sessions/active` and `GET /cards/{id}/sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionList {
    /// The service encodes an empty list as `null`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sessions: Vec<Session>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Session>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<Vec<Session>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// Check that `input` is a card UUID and return it in canonical
/// (lowercase, hyphenated) form.
pub fn validate_card_id(input: &str) -> Result<String, Error> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Validation("card id must not be empty".into()));
    }
    Uuid::parse_str(input)
        .map(|id| id.hyphenated().to_string())
        .map_err(|_| Error::Validation(format!("card id must be a UUID, got '{}'", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIVE: &str = r#"{
        "session_id": "5f0c9a7e-0000-4000-8000-000000000001",
        "card_id": "11111111-1111-1111-1111-111111111111",
        "device_id": "ctg-01",
        "status": "active",
        "start_time": "2024-05-01T10:00:00Z",
        "duration": 0
    }"#;

    #[test]
    fn test_deserialize_session() {
        let session: Session = serde_json::from_str(ACTIVE).unwrap();
        assert_eq!(session.card_id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(session.device_id, "ctg-01");
        assert!(session.is_active());
        assert!(session.end_time.is_none());
    }

    #[test]
    fn test_envelope_accepts_session_and_data_keys() {
        let wrapped = format!(r#"{{"message":"ok","session":{}}}"#, ACTIVE);
        let env: SessionEnvelope = serde_json::from_str(&wrapped).unwrap();
        assert!(env.session.is_some());

        let wrapped = format!(r#"{{"data":{}}}"#, ACTIVE);
        let env: SessionEnvelope = serde_json::from_str(&wrapped).unwrap();
        assert!(env.session.is_some());
    }

    #[test]
    fn test_session_list_null() {
        let list: SessionList = serde_json::from_str(r#"{"sessions":null,"count":0}"#).unwrap();
        assert!(list.sessions.is_empty());
    }

    #[test]
    fn test_error_body_prefers_details() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"error":"bad request","details":"card_id missing"}"#)
                .unwrap();
        assert_eq!(body.message().as_deref(), Some("card_id missing"));

        let body: ApiErrorBody = serde_json::from_str(r#"{"error":"not found"}"#).unwrap();
        assert_eq!(body.message().as_deref(), Some("not found"));
    }

    #[test]
    fn test_validate_card_id() {
        assert_eq!(
            validate_card_id(" 11111111-1111-1111-1111-111111111111 ").unwrap(),
            "11111111-1111-1111-1111-111111111111"
        );
        assert_eq!(
            validate_card_id("AAAAAAAA-BBBB-4CCC-8DDD-EEEEEEEEEEEE").unwrap(),
            "aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee"
        );
        assert!(validate_card_id("").unwrap_err().is_validation());
        assert!(validate_card_id("card-1").unwrap_err().is_validation());
    }

    #[test]
    fn test_elapsed_uses_end_time() {
        let mut session: Session = serde_json::from_str(ACTIVE).unwrap();
        session.status = SessionStatus::Stopped;
        session.end_time = Some("2024-05-01T10:20:00Z".parse().unwrap());
        let now: DateTime<Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
        assert_eq!(session.elapsed_secs(now), 1200);
    }
}
