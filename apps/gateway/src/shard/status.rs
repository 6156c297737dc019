//! Shard connection status
//!
//! The worker owns every transition; the supervisor only mirrors the last
//! value it was told about.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of a shard's gateway socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardStatus {
    /// No socket is open
    #[default]
    Disconnected,
    /// Opening a fresh connection and identifying
    Connecting,
    /// Identified (or resumed) and receiving events
    Connected,
    /// Re-establishing a connection with prior session state
    Resuming,
    /// Dropped the connection and about to open a new one
    Reconnecting,
}

impl ShardStatus {
    /// Every status, in declaration order
    pub const ALL: [ShardStatus; 5] = [
        ShardStatus::Disconnected,
        ShardStatus::Connecting,
        ShardStatus::Connected,
        ShardStatus::Resuming,
        ShardStatus::Reconnecting,
    ];

    /// Returns true if the shard is receiving events
    pub fn is_connected(&self) -> bool {
        matches!(self, ShardStatus::Connected)
    }

    /// Wire name, as carried by `CONNECTION_STATUS_UPDATE`
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Disconnected => "DISCONNECTED",
            ShardStatus::Connecting => "CONNECTING",
            ShardStatus::Connected => "CONNECTED",
            ShardStatus::Resuming => "RESUMING",
            ShardStatus::Reconnecting => "RECONNECTING",
        }
    }

    /// Numeric value for the `shard_status` gauge
    pub fn gauge_value(&self) -> f64 {
        match self {
            ShardStatus::Disconnected => 0.0,
            ShardStatus::Connecting => 1.0,
            ShardStatus::Connected => 2.0,
            ShardStatus::Resuming => 3.0,
            ShardStatus::Reconnecting => 4.0,
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
