//! Push-channel wire frames (JSON text messages)

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Result;

/// Frames sent by the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection
    Auth {
        token: String,
        #[serde(rename = "clientName")]
        client_name: String,
    },
    /// Liveness probe
    Ping,
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frame received from the server: `{type, data, timestamp?}`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Server timestamp (epoch millis or RFC 3339), else `received_at`
    pub fn timestamp_or(&self, received_at: DateTime<Utc>) -> DateTime<Utc> {
        let parsed = match &self.timestamp {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        };
        parsed.unwrap_or(received_at)
    }

    /// `data.message` when the server explains a rejection
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frames_shape() {
        let auth = ClientFrame::Auth {
            token: "tok".into(),
            client_name: "wallet-cli".into(),
        };
        let value: Value = serde_json::from_str(&auth.to_text().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "auth", "token": "tok", "clientName": "wallet-cli"}));

        let ping = ClientFrame::Ping.to_text().unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_server_frame_timestamps() {
        let received = Utc.timestamp_millis_opt(5_000).unwrap();

        let frame = ServerFrame::parse(r#"{"type":"balance_update","data":{"amount":1},"timestamp":1700000000000}"#)
            .unwrap();
        assert_eq!(frame.timestamp_or(received).timestamp_millis(), 1_700_000_000_000);

        let frame = ServerFrame::parse(r#"{"type":"notification","timestamp":"2024-01-02T03:04:05Z"}"#).unwrap();
        assert_eq!(frame.timestamp_or(received).to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(frame.data, Value::Null);

        let frame = ServerFrame::parse(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(frame.timestamp_or(received), received);
    }
}
