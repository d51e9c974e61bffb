use serde::{Deserialize, Serialize};

use super::message::{DataPayload, DataType, StreamMessage};

/// Value reported by the device when it has no reading.
pub const LOSS_SENTINEL: f64 = -1.0;

/// A normalized time-series sample, as stored in the buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtgDataPoint {
    /// Ingestion time in epoch milliseconds.
    pub timestamp_ms: i64,
    pub data_type: DataType,
    pub value: f64,
    /// Offset on the device clock, in seconds.
    pub time_sec: f64,
    pub device_id: String,
}

impl CtgDataPoint {
    /// Build a point from a data payload.
    ///
    /// The envelope timestamp is preferred; `fallback_ms` is used when it is
    /// missing or unparsable.
    pub fn from_message(message: &StreamMessage, payload: &DataPayload, fallback_ms: i64) -> Self {
        Self {
            timestamp_ms: message.timestamp_millis().unwrap_or(fallback_ms),
            data_type: payload.data_type.clone(),
            value: payload.value,
            time_sec: payload.time_sec,
            device_id: payload.device_id.clone(),
        }
    }

    /// Returns true if the sample carries the loss sentinel.
    pub fn is_signal_lost(&self) -> bool {
        self.value == LOSS_SENTINEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;

    #[test]
    fn test_from_message_uses_envelope_timestamp() {
        let msg = StreamMessage::parse(
            r#"{"timestamp":"1970-01-01T00:00:01.500Z","type":"data",
                "data":{"device_id":"d","data_type":"fetal_heart_rate","value":-1,"time_sec":3}}"#,
        )
        .unwrap();
        let MessageKind::Data(ref payload) = msg.kind else {
            panic!("expected data");
        };

        let point = CtgDataPoint::from_message(&msg, payload, 99);
        assert_eq!(point.timestamp_ms, 1500);
        assert!(point.is_signal_lost());
        assert_eq!(point.time_sec, 3.0);
    }

    #[test]
    fn test_from_message_falls_back_to_local_clock() {
        let msg = StreamMessage::parse(
            r#"{"timestamp":"yesterday","type":"data",
                "data":{"data_type":"uterine_contractions","value":20}}"#,
        )
        .unwrap();
        let MessageKind::Data(ref payload) = msg.kind else {
            panic!("expected data");
        };

        let point = CtgDataPoint::from_message(&msg, payload, 42);
        assert_eq!(point.timestamp_ms, 42);
        assert!(!point.is_signal_lost());
    }
}
