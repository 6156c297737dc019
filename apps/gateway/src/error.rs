//! Domain error types for the shard supervisor
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, GatewayError>.

use thiserror::Error;

/// Gateway domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// Callers can pattern-match on the variant to understand the failure
/// mode without parsing error message strings.
///
/// Example:
/// ```text
/// GatewayError::CannotReconnect { shard_id: 2, code: 4004, reason: "Authentication failed" }
/// → "WebSocket closed with code 4004: Authentication failed"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The gateway rejected the connection with a non-recoverable close code.
    /// The shard has been destroyed and its worker terminated.
    #[error("WebSocket closed with code {code}: {reason}")]
    CannotReconnect {
        shard_id: u32,
        code: u16,
        reason: String,
    },

    /// The worker channel ended before a correlated reply arrived
    #[error("shard {shard_id} worker exited before replying")]
    WorkerGone { shard_id: u32 },

    /// An operation needed a live worker and there was none
    #[error("shard {shard_id} has no running worker")]
    NoWorker { shard_id: u32 },

    /// The shard was destroyed and will not spawn another worker
    #[error("shard {shard_id} is destroyed")]
    ShardDestroyed { shard_id: u32 },

    /// The spawner could not start a connection worker
    #[error("shard {shard_id} worker failed to spawn: {reason}")]
    WorkerSpawn { shard_id: u32, reason: String },

    /// Shard id outside of `0..total`
    #[error("invalid shard {id}/{total}")]
    InvalidShard { id: u32, total: u32 },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Shard count overflow: u64 value exceeds u32::MAX (Twilight API boundary)
    #[error("shard ID overflow: {value} exceeds u32::MAX")]
    ShardIdOverflow { value: u64 },
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::CannotReconnect { .. } => "cannot_reconnect",
            Self::WorkerGone { .. } => "worker_gone",
            Self::NoWorker { .. } => "no_worker",
            Self::ShardDestroyed { .. } => "shard_destroyed",
            Self::WorkerSpawn { .. } => "worker_spawn",
            Self::InvalidShard { .. } => "invalid_shard",
            Self::Config(_) => "config",
            Self::ShardIdOverflow { .. } => "shard_overflow",
        }
    }
}

/// Errors reported by a connection worker while it is alive.
///
/// These are surfaced to the orchestrator but never tear the shard down
/// on their own; the worker's exit does that.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The gateway connection failed in a way the worker could not absorb
    #[error("gateway connection failed: {0}")]
    Gateway(String),

    /// The worker task panicked
    #[error("worker panicked")]
    Panicked,

    /// The worker was handed a shard tuple it cannot connect with
    #[error("invalid shard {id}/{total}")]
    InvalidShard { id: u32, total: u32 },
}
