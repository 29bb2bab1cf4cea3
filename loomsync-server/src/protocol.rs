//! Frames, validates, and version-negotiates the wire protocol between the
//! session server and a connected device (C7).
//!
//! Every frame is a JSON object `{ type, sessionId, timestamp, version,
//! payload }`; `payload`'s shape depends on `type` (spec.md §4.7). The
//! codec only validates frame *shape* — it does not know about session
//! lifecycle, which [`crate::session`] owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServerError};

/// Major protocol version this server implements. Negotiation compares
/// major numbers only (spec.md §9 leaves full-semver compatibility as an
/// explicit implementer decision; this project picked major-only so a
/// client and server agreeing on the wire shape can differ in patch
/// releases without a forced upgrade).
pub const PROTOCOL_VERSION: &str = "1.0.0";

fn major_of(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Connect,
    Connected,
    Ping,
    Pong,
    Ack,
    Update,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(kind: MessageType, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            version: PROTOCOL_VERSION.to_string(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ServerError::Protocol(e.to_string()))
    }

    /// Checks `version`'s major number against [`PROTOCOL_VERSION`]'s.
    /// `None` means the incoming version string couldn't be parsed, which
    /// is treated as incompatible the same as a mismatched major.
    pub fn is_compatible_version(&self) -> bool {
        Self::major_is_compatible(&self.version)
    }

    /// Same check as [`Self::is_compatible_version`], but against an
    /// arbitrary version string rather than this frame's envelope
    /// `version` — used to negotiate on a connect payload's
    /// `clientVersion` instead.
    pub fn major_is_compatible(version: &str) -> bool {
        let (Some(client_major), Some(server_major)) = (major_of(version), major_of(PROTOCOL_VERSION)) else {
            return false;
        };
        client_major == server_major
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub device_id: String,
    pub platform: String,
    #[serde(default)]
    pub device_name: Option<String>,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_schema: Option<loomsync_core::ir::IrDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub sequence_number: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub sequence_number: u64,
    pub kind: UpdateKind,
    pub preserve_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<loomsync_core::ir::IrDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<crate::delta::SchemaDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    pub fn unsupported_version(client: &str, server_major: u32) -> Self {
        Self {
            code: "unsupported-version".to_string(),
            message: format!(
                "client protocol version {client} is incompatible with server major version {server_major}"
            ),
            severity: ErrorSeverity::Fatal,
            recoverable: false,
            details: None,
        }
    }
}

/// Close codes per spec.md §6's bidirectional-stream contract.
pub mod close_code {
    pub const SESSION_ID_MISMATCH: u16 = 4400;
    pub const NOT_AUTHENTICATED: u16 = 4401;
    pub const UNKNOWN_SESSION: u16 = 4404;
    pub const SESSION_EXPIRED: u16 = 4410;
    pub const UNSUPPORTED_VERSION: u16 = 4426;
    pub const NORMAL_CLOSURE: u16 = 1000;
    pub const POLICY_VIOLATION: u16 = 1008;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_version_match_is_compatible() {
        let frame = Frame::new(MessageType::Connect, "s1", serde_json::json!({}));
        let mut frame = frame;
        frame.version = "1.4.2".to_string();
        assert!(frame.is_compatible_version());
    }

    #[test]
    fn major_version_mismatch_is_incompatible() {
        let mut frame = Frame::new(MessageType::Connect, "s1", serde_json::json!({}));
        frame.version = "2.0.0".to_string();
        assert!(!frame.is_compatible_version());
    }

    #[test]
    fn unparseable_version_is_incompatible() {
        let mut frame = Frame::new(MessageType::Connect, "s1", serde_json::json!({}));
        frame.version = "not-a-version".to_string();
        assert!(!frame.is_compatible_version());
    }

    #[test]
    fn frame_round_trips_through_json() {
        let payload = serde_json::to_value(ConnectPayload {
            device_id: "d1".to_string(),
            platform: "ios".to_string(),
            device_name: None,
            client_version: "1.0.0".to_string(),
        })
        .unwrap();
        let frame = Frame::new(MessageType::Connect, "s1", payload);
        let json = frame.to_json().unwrap();
        let parsed = Frame::from_json(&json).unwrap();
        assert_eq!(parsed.kind, MessageType::Connect);
        assert_eq!(parsed.session_id, "s1");
    }
}
