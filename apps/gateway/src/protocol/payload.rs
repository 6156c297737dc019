//! Payload shapes carried by protocol actions
//!
//! The supervisor treats gateway payloads opaquely: it stamps dispatches
//! with a shard id and relays outbound commands verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use twilight_model::gateway::{CloseCode, OpCode};

/// Outcome of an identify or resume attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Ready,
    InvalidSession,
}

/// Outbound gateway command, relayed to the socket as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendPayload {
    /// Numeric gateway opcode
    pub op: u8,
    pub d: Value,
}

impl SendPayload {
    pub fn new(op: OpCode, d: Value) -> Self {
        Self { op: op as u8, d }
    }
}

/// Decoded inbound gateway event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    /// Event name, e.g. `GUILD_CREATE`
    pub t: String,
    /// Sequence number, when the worker tracks one
    #[serde(default)]
    pub s: Option<u64>,
    pub d: Value,
    /// Filled in by the supervisor before the event leaves the shard
    #[serde(default)]
    pub shard_id: Option<u32>,
}

impl DispatchPayload {
    pub fn new(t: impl Into<String>, d: Value) -> Self {
        Self {
            t: t.into(),
            s: None,
            d,
            shard_id: None,
        }
    }

    /// Annotate the event with the shard that received it
    pub fn stamp(mut self, shard_id: u32) -> Self {
        self.shard_id = Some(shard_id);
        self
    }
}

/// Close code and reason of a connection the gateway will not let us resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Known gateway close code, if any
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::try_from(self.code).ok()
    }

    /// Whether the gateway allows reconnecting after this close.
    ///
    /// Codes outside the gateway's range (1000-range socket codes) are
    /// treated as reconnectable.
    pub fn can_reconnect(&self) -> bool {
        self.close_code().map_or(true, |code| code.can_reconnect())
    }
}

/// Session state reported by the worker. Opaque to the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
}
