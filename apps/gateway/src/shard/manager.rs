//! Orchestrator boundary
//!
//! Everything a shard supervisor cannot decide on its own goes through
//! [`ShardManager`]: restart timing, identify-slot scheduling, and where
//! debug output, errors, and decoded events end up.

use crate::error::WorkerError;
use crate::protocol::DispatchPayload;
use crate::shard::ShardSupervisor;
use serde_json::{Map, Value};
use twilight_gateway::Intents;

/// Gateway protocol version spoken by default
pub const DEFAULT_GATEWAY_VERSION: u8 = 10;

/// Orchestrator-held configuration read by every supervisor at spawn time
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub gateway_version: u8,
    pub intents: Intents,
    /// Extra worker startup options, merged under `intents` and `shard`
    pub additional_options: Map<String, Value>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            gateway_version: DEFAULT_GATEWAY_VERSION,
            intents: Intents::empty(),
            additional_options: Map::new(),
        }
    }
}

/// The fleet-level owner of all shards
pub trait ShardManager: Send + Sync + 'static {
    fn options(&self) -> &ManagerOptions;

    /// Fire-and-forget debug output
    fn debug(&self, message: String);

    /// A worker reported an error while alive
    fn error(&self, shard_id: u32, error: &WorkerError);

    /// Forward a decoded gateway event under its own event name
    fn emit(&self, event: &str, payload: DispatchPayload);

    /// An undestroyed worker exited, or a restart was asked for with no worker
    fn schedule_shard_restart(&self, shard: &ShardSupervisor);

    /// The worker wants an identify slot
    fn schedule_identify(&self, shard: &ShardSupervisor);
}
