//! The relay wire protocol (spec.md §4.4, §6 "relay wire protocol").
//!
//! One JSON object per frame: `t` (type tag), `id` (logical connection),
//! plus `host`/`port` for `open`, `b64` for `write`/`data`, `msg` for
//! `error`. Payload bytes are base-64 text inside the JSON, not raw bytes —
//! the teacher crate has no existing binary-to-text codec, so this pulls in
//! the `base64` crate (see DESIGN.md).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::task::ConnectionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Frame {
    #[serde(rename = "open")]
    Open { id: u32, host: String, port: u16 },
    #[serde(rename = "opened")]
    Opened { id: u32 },
    #[serde(rename = "write")]
    Write { id: u32, b64: String },
    #[serde(rename = "data")]
    Data { id: u32, b64: String },
    #[serde(rename = "close")]
    Close { id: u32 },
    #[serde(rename = "closed")]
    Closed { id: u32 },
    #[serde(rename = "error")]
    Error { id: u32, msg: String },
}

impl Frame {
    pub fn connection_id(&self) -> ConnectionId {
        let id = match self {
            Frame::Open { id, .. }
            | Frame::Opened { id }
            | Frame::Write { id, .. }
            | Frame::Data { id, .. }
            | Frame::Close { id }
            | Frame::Closed { id }
            | Frame::Error { id, .. } => *id,
        };
        ConnectionId(id)
    }

    pub fn open(id: ConnectionId, host: impl Into<String>, port: u16) -> Self {
        Frame::Open { id: id.0, host: host.into(), port }
    }

    pub fn write(id: ConnectionId, payload: &[u8]) -> Self {
        Frame::Write { id: id.0, b64: BASE64.encode(payload) }
    }

    pub fn close(id: ConnectionId) -> Self {
        Frame::Close { id: id.0 }
    }

    /// Decode this frame's payload, for `data`/`write` frames only.
    pub fn payload(&self) -> Option<Vec<u8>> {
        match self {
            Frame::Write { b64, .. } | Frame::Data { b64, .. } => BASE64.decode(b64).ok(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_frame_base64_round_trips() {
        let frame = Frame::write(ConnectionId(3), b"hello");
        let payload = frame.payload().unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn open_frame_serializes_with_type_tag() {
        let frame = Frame::open(ConnectionId(1), "example.com", 443);
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"t\":\"open\""));
        assert!(json.contains("\"port\":443"));
    }

    #[test]
    fn error_frame_round_trips_through_json() {
        let text = r#"{"t":"error","id":7,"msg":"boom"}"#;
        let frame = Frame::from_json(text).unwrap();
        match frame {
            Frame::Error { id, msg } => {
                assert_eq!(id, 7);
                assert_eq!(msg, "boom");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unparseable_frame_is_an_error_not_a_panic() {
        assert!(Frame::from_json("not json").is_err());
    }
}
