//! Shard management module
//!
//! One [`ShardSupervisor`] per shard, owned by a [`ShardManager`]. The
//! bundled manager is [`ShardPool`].

mod manager;
mod pool;
mod status;
mod supervisor;

pub use manager::{ManagerOptions, ShardManager, DEFAULT_GATEWAY_VERSION};
pub use pool::{shard_range, ShardPool, SHARDS_PER_POOL};
pub use status::ShardStatus;
pub use supervisor::{ShardSupervisor, PING_UNKNOWN};
