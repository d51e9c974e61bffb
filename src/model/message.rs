//! Wire envelope delivered over the event stream.
//!
//! Each SSE event carries one JSON envelope:
//!
//! ```json
//! {"timestamp": "2024-05-01T10:00:01.000Z", "type": "data",
//!  "data": {"device_id": "ctg-01", "data_type": "fetal_heart_rate", "value": 142, "time_sec": 1}}
//! ```
//!
//! The `type` field selects which of the optional fields are meaningful.
//! The stream proxy emits data envelopes without a `type`, so an envelope
//! carrying a `data` object and no `type` is read as a data message.

use std::fmt;

use chrono::DateTime;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Physiological channel carried by a data point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    FetalHeartRate,
    UterineContractions,
    /// Any channel this client does not know about.
    Other(String),
}

impl DataType {
    /// Wire tag of the channel.
    pub fn as_str(&self) -> &str {
        match self {
            DataType::FetalHeartRate => "fetal_heart_rate",
            DataType::UterineContractions => "uterine_contractions",
            DataType::Other(tag) => tag,
        }
    }

    /// Human readable channel name.
    pub fn label(&self) -> &str {
        match self {
            DataType::FetalHeartRate => "Fetal heart rate",
            DataType::UterineContractions => "Uterine contractions",
            DataType::Other(tag) => tag,
        }
    }

    /// Display unit for values of this channel.
    pub fn unit(&self) -> &'static str {
        match self {
            DataType::FetalHeartRate => "bpm",
            DataType::UterineContractions => "mmHg",
            DataType::Other(_) => "",
        }
    }
}

impl From<String> for DataType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "fetal_heart_rate" => DataType::FetalHeartRate,
            "uterine_contractions" => DataType::UterineContractions,
            _ => DataType::Other(tag),
        }
    }
}

impl From<&str> for DataType {
    fn from(tag: &str) -> Self {
        DataType::from(tag.to_string())
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `data` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataPayload {
    #[serde(default)]
    pub device_id: String,
    pub data_type: DataType,
    /// Reading; `-1` means the sensor lost the signal.
    #[serde(deserialize_with = "number_or_string")]
    pub value: f64,
    /// Offset on the device clock, in seconds.
    #[serde(default, deserialize_with = "number_or_string")]
    pub time_sec: f64,
}

/// Discriminated content of a [`StreamMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Connected,
    Heartbeat,
    Data(DataPayload),
    NoData { message: Option<String> },
    End,
    Error { message: Option<String> },
    /// A discriminant this client does not understand. Ignored by consumers.
    Unknown(String),
}

/// One decoded envelope from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// ISO-8601 timestamp stamped by the sender, if any.
    pub timestamp: Option<String>,
    pub kind: MessageKind,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl StreamMessage {
    /// Decode the JSON text of one SSE event.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text.trim())?;

        let kind = match raw.kind.as_deref() {
            Some("connected") => MessageKind::Connected,
            Some("heartbeat") => MessageKind::Heartbeat,
            Some("data") => MessageKind::Data(Self::payload(raw.data)?),
            Some("no_data") => MessageKind::NoData {
                message: raw.message,
            },
            Some("end") => MessageKind::End,
            Some("error") => MessageKind::Error {
                message: raw.message,
            },
            Some(other) => MessageKind::Unknown(other.to_string()),
            None if raw.data.as_ref().is_some_and(|d| d.is_object()) => {
                MessageKind::Data(Self::payload(raw.data)?)
            }
            None => MessageKind::Unknown(String::new()),
        };

        Ok(Self {
            timestamp: raw.timestamp,
            kind,
        })
    }

    fn payload(data: Option<serde_json::Value>) -> Result<DataPayload> {
        let value = data.ok_or_else(|| Error::Parse("data message without payload".into()))?;
        Ok(serde_json::from_value(value)?)
    }

    /// The sender timestamp as epoch milliseconds, if present and valid.
    pub fn timestamp_millis(&self) -> Option<i64> {
        let ts = self.timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(ts)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }

    /// Returns true if this message ends the stream it arrived on.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::End | MessageKind::NoData { .. } | MessageKind::Error { .. }
        )
    }

    /// Wire name of the discriminant.
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            MessageKind::Connected => "connected",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Data(_) => "data",
            MessageKind::NoData { .. } => "no_data",
            MessageKind::End => "end",
            MessageKind::Error { .. } => "error",
            MessageKind::Unknown(name) => name,
        }
    }
}

// The gRPC bridge renders 64-bit numbers as strings.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_message() {
        let msg = StreamMessage::parse(
            r#"{"timestamp":"2024-05-01T10:00:01Z","type":"data",
                "data":{"device_id":"ctg-01","data_type":"fetal_heart_rate","value":142,"time_sec":1}}"#,
        )
        .unwrap();

        let MessageKind::Data(payload) = &msg.kind else {
            panic!("expected data, got {:?}", msg.kind);
        };
        assert_eq!(payload.data_type, DataType::FetalHeartRate);
        assert_eq!(payload.value, 142.0);
        assert_eq!(payload.time_sec, 1.0);
        assert_eq!(msg.timestamp_millis(), Some(1_714_557_601_000));
    }

    #[test]
    fn test_parse_untyped_data_from_proxy() {
        let msg = StreamMessage::parse(
            r#"{"timestamp":"2024-05-01T10:00:01Z",
                "data":{"device_id":"ctg-01","data_type":"uterine_contractions","value":"12.5","time_sec":"7"}}"#,
        )
        .unwrap();

        let MessageKind::Data(payload) = msg.kind else {
            panic!("expected data");
        };
        assert_eq!(payload.data_type, DataType::UterineContractions);
        assert_eq!(payload.value, 12.5);
        assert_eq!(payload.time_sec, 7.0);
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            StreamMessage::parse(r#"{"type":"connected"}"#).unwrap().kind,
            MessageKind::Connected
        );
        assert_eq!(
            StreamMessage::parse(r#"{"type":"heartbeat"}"#).unwrap().kind,
            MessageKind::Heartbeat
        );
        assert_eq!(StreamMessage::parse(r#"{"type": "end"}"#).unwrap().kind, MessageKind::End);

        let err = StreamMessage::parse(r#"{"type":"error","message":"device offline"}"#).unwrap();
        assert_eq!(
            err.kind,
            MessageKind::Error {
                message: Some("device offline".into())
            }
        );
        assert!(err.is_terminal());

        let no_data = StreamMessage::parse(r#"{"type":"no_data","message":"idle"}"#).unwrap();
        assert!(no_data.is_terminal());
    }

    #[test]
    fn test_unknown_discriminant_is_not_an_error() {
        let msg = StreamMessage::parse(r#"{"type":"calibration","data":{"x":1}}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown("calibration".into()));
        assert!(!msg.is_terminal());
    }

    #[test]
    fn test_data_without_payload_is_rejected() {
        assert!(StreamMessage::parse(r#"{"type":"data"}"#).is_err());
        assert!(StreamMessage::parse("not json").is_err());
    }

    #[test]
    fn test_loss_sentinel_survives_decoding() {
        let msg = StreamMessage::parse(
            r#"{"type":"data","data":{"data_type":"fetal_heart_rate","value":-1,"time_sec":2}}"#,
        )
        .unwrap();
        let MessageKind::Data(payload) = msg.kind else {
            panic!("expected data");
        };
        assert_eq!(payload.value, -1.0);
        assert!(payload.device_id.is_empty());
    }

    #[test]
    fn test_data_type_round_trips_unknown_tags() {
        let dt = DataType::from("maternal_pulse");
        assert_eq!(dt, DataType::Other("maternal_pulse".into()));
        assert_eq!(String::from(dt), "maternal_pulse");
        assert_eq!(DataType::FetalHeartRate.to_string(), "fetal_heart_rate");
    }
}
