//! Supervisor ↔ worker message protocol
//!
//! Two closed vocabularies of tagged actions, one per direction. Every
//! message is self-describing on the wire:
//!
//! ```text
//! {"type": "CONNECTION_STATUS_UPDATE", "data": "CONNECTING"}
//! {"type": "IDENTIFY"}
//! ```

mod payload;

pub use payload::{CloseInfo, DispatchPayload, GatewayStatus, SendPayload, SessionDetails};

use crate::shard::ShardStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action tags shared by both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalAction {
    Debug,
    Dispatch,
    Destroy,
    Identify,
    UpdatePing,
    ScheduleIdentify,
    GatewayStatus,
    CannotReconnect,
    ConnectionStatusUpdate,
    PayloadDispatch,
    Reconnect,
    FetchSessionData,
}

impl InternalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Dispatch => "DISPATCH",
            Self::Destroy => "DESTROY",
            Self::Identify => "IDENTIFY",
            Self::UpdatePing => "UPDATE_PING",
            Self::ScheduleIdentify => "SCHEDULE_IDENTIFY",
            Self::GatewayStatus => "GATEWAY_STATUS",
            Self::CannotReconnect => "CANNOT_RECONNECT",
            Self::ConnectionStatusUpdate => "CONNECTION_STATUS_UPDATE",
            Self::PayloadDispatch => "PAYLOAD_DISPATCH",
            Self::Reconnect => "RECONNECT",
            Self::FetchSessionData => "FETCH_SESSION_DATA",
        }
    }
}

impl fmt::Display for InternalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervisor → worker actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorMessage {
    /// Re-identify (or resume) using the credentials the worker started with
    Identify,
    /// Close the connection gracefully and exit
    Destroy,
    /// Drop the current connection and open a fresh one
    Reconnect,
    /// Relay a command to the gateway verbatim
    PayloadDispatch(SendPayload),
    /// Ask for the current session details
    FetchSessionData,
}

impl SupervisorMessage {
    pub fn action(&self) -> InternalAction {
        match self {
            Self::Identify => InternalAction::Identify,
            Self::Destroy => InternalAction::Destroy,
            Self::Reconnect => InternalAction::Reconnect,
            Self::PayloadDispatch(_) => InternalAction::PayloadDispatch,
            Self::FetchSessionData => InternalAction::FetchSessionData,
        }
    }
}

/// Worker → supervisor actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    Debug(String),
    /// Decoded gateway event, stamped with the shard id by the supervisor
    Dispatch(DispatchPayload),
    Identify,
    /// The worker wants an identify slot from the orchestrator
    ScheduleIdentify,
    /// Heartbeat round-trip in milliseconds
    UpdatePing(i64),
    /// Reply to an in-flight connect
    GatewayStatus(GatewayStatus),
    /// Terminal rejection of the connection
    CannotReconnect(CloseInfo),
    ConnectionStatusUpdate(ShardStatus),
    /// Never originated by the bundled worker; accepted and ignored
    PayloadDispatch(SendPayload),
    /// Reply to a session data request
    FetchSessionData(SessionDetails),
}

impl WorkerMessage {
    pub fn action(&self) -> InternalAction {
        match self {
            Self::Debug(_) => InternalAction::Debug,
            Self::Dispatch(_) => InternalAction::Dispatch,
            Self::Identify => InternalAction::Identify,
            Self::ScheduleIdentify => InternalAction::ScheduleIdentify,
            Self::UpdatePing(_) => InternalAction::UpdatePing,
            Self::GatewayStatus(_) => InternalAction::GatewayStatus,
            Self::CannotReconnect(_) => InternalAction::CannotReconnect,
            Self::ConnectionStatusUpdate(_) => InternalAction::ConnectionStatusUpdate,
            Self::PayloadDispatch(_) => InternalAction::PayloadDispatch,
            Self::FetchSessionData(_) => InternalAction::FetchSessionData,
        }
    }
}
