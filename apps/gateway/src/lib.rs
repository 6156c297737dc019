//! Gateway shard supervision
//!
//! Runs one connection worker per gateway shard, mirrors each worker's
//! connection status, and relays commands and decoded events between the
//! worker and the process-level [`ShardPool`](shard::ShardPool).

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod shard;
pub mod worker;

pub use config::GatewayConfig;
pub use error::{GatewayError, WorkerError};
pub use protocol::{GatewayStatus, SendPayload, SupervisorMessage, WorkerMessage};
pub use shard::{ShardManager, ShardPool, ShardStatus, ShardSupervisor};
