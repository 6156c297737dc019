//! Shard pool implementation
//!
//! Process-local orchestrator: owns the supervisors for one pool's range
//! of shards and answers their restart and identify requests.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, WorkerError};
use crate::protocol::DispatchPayload;
use crate::shard::{ManagerOptions, ShardManager, ShardSupervisor};
use crate::worker::WorkerSpawner;

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Number of shards per gateway process (pool)
pub const SHARDS_PER_POOL: u32 = 25;

/// Capacity of the decoded event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Spaces identify attempts across every shard in the pool
#[derive(Debug)]
struct IdentifyGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl IdentifyGate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until at least `interval` has passed since the previous slot
    async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.interval).await;
        }
        *last = Some(Instant::now());
    }
}

/// Shard pool managing the supervisors of one pool
pub struct ShardPool {
    pool_id: u32,
    token: String,
    options: ManagerOptions,
    restart_delay: Duration,
    shards: DashMap<u32, ShardSupervisor>,
    events: broadcast::Sender<DispatchPayload>,
    identify_gate: Arc<IdentifyGate>,
    shutting_down: AtomicBool,
}

impl ShardPool {
    /// Create the supervisors for `config.pool_id`'s shard range.
    ///
    /// No worker is spawned until [`ShardPool::start`].
    pub fn new(
        config: &GatewayConfig,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Arc<Self>, GatewayError> {
        let (start_shard, end_shard) = shard_range(config.pool_id, config.total_shards)?;

        info!(
            pool_id = config.pool_id,
            start_shard,
            end_shard,
            shard_count = end_shard - start_shard,
            "Creating shard pool"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pool = Arc::new(Self {
            pool_id: config.pool_id,
            token: config.discord_token.clone(),
            options: config.manager_options(),
            restart_delay: config.restart_delay,
            shards: DashMap::new(),
            events,
            identify_gate: Arc::new(IdentifyGate::new(config.identify_interval)),
            shutting_down: AtomicBool::new(false),
        });

        for shard_id in start_shard..end_shard {
            let manager: Arc<dyn ShardManager> = pool.clone();
            let shard = ShardSupervisor::new(
                shard_id,
                config.total_shards,
                config.gateway_url.clone(),
                manager,
                Arc::clone(&spawner),
            )?;
            pool.shards.insert(shard_id, shard);
        }

        Ok(pool)
    }

    /// Get the pool ID
    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    pub fn shard(&self, shard_id: u32) -> Option<ShardSupervisor> {
        self.shards.get(&shard_id).map(|entry| entry.value().clone())
    }

    /// Supervisors of this pool, ordered by shard id
    pub fn shards(&self) -> Vec<ShardSupervisor> {
        let mut shards: Vec<_> = self.shards.iter().map(|entry| entry.value().clone()).collect();
        shards.sort_by_key(ShardSupervisor::id);
        shards
    }

    /// Get total shard count in this pool
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Get count of connected shards
    pub fn connected_shards(&self) -> usize {
        self.shards
            .iter()
            .filter(|entry| entry.value().status().is_connected())
            .count()
    }

    /// Check if pool is ready (at least one shard connected)
    pub fn is_ready(&self) -> bool {
        self.connected_shards() > 0
    }

    /// Receive every decoded event forwarded by this pool's shards
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchPayload> {
        self.events.subscribe()
    }

    /// Connect every shard, one identify interval apart
    pub async fn start(&self) {
        for shard in self.shards() {
            self.identify_gate.acquire().await;
            spawn_connect(shard, self.token.clone());
        }
    }

    /// Destroy every shard and release them
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for shard in self.shards() {
            shard.destroy();
        }
        // Supervisors hold the pool as their manager
        self.shards.clear();
        info!(pool_id = self.pool_id, "Shard pool shut down");
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

impl ShardManager for ShardPool {
    fn options(&self) -> &ManagerOptions {
        &self.options
    }

    fn debug(&self, message: String) {
        debug!(pool_id = self.pool_id, "{message}");
    }

    fn error(&self, shard_id: u32, error: &WorkerError) {
        error!(pool_id = self.pool_id, shard_id, error = %error, "Shard worker error");
    }

    fn emit(&self, event: &str, payload: DispatchPayload) {
        debug!(pool_id = self.pool_id, shard_id = ?payload.shard_id, event, "Gateway event");
        // No subscribers is fine
        let _ = self.events.send(payload);
    }

    fn schedule_shard_restart(&self, shard: &ShardSupervisor) {
        if self.is_shutting_down() || shard.is_destroyed() {
            debug!(shard_id = shard.id(), "Not restarting destroyed shard");
            return;
        }

        info!(
            shard_id = shard.id(),
            delay_ms = self.restart_delay.as_millis() as u64,
            "Scheduling shard restart"
        );

        let shard = shard.clone();
        let token = self.token.clone();
        let delay = self.restart_delay;
        let gate = Arc::clone(&self.identify_gate);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            gate.acquire().await;
            spawn_connect(shard, token);
        });
    }

    fn schedule_identify(&self, shard: &ShardSupervisor) {
        debug!(shard_id = shard.id(), "Queueing identify");

        let shard = shard.clone();
        let token = self.token.clone();
        let gate = Arc::clone(&self.identify_gate);
        tokio::spawn(async move {
            gate.acquire().await;
            spawn_connect(shard, token);
        });
    }
}

fn spawn_connect(shard: ShardSupervisor, token: String) {
    tokio::spawn(async move {
        let shard_id = shard.id();
        match shard.connect(token).await {
            Ok(status) => info!(shard_id, ?status, "Shard connected"),
            Err(GatewayError::ShardDestroyed { .. }) => {
                debug!(shard_id, "Shard destroyed before connecting")
            }
            Err(e) => warn!(shard_id, error = %e, "Shard connect failed"),
        }
    });
}

/// `[start, end)` shard ids owned by `pool_id`
pub fn shard_range(pool_id: u32, total_shards: u32) -> Result<(u32, u32), GatewayError> {
    let start = pool_id
        .checked_mul(SHARDS_PER_POOL)
        .ok_or(GatewayError::ShardIdOverflow {
            value: u64::from(pool_id) * u64::from(SHARDS_PER_POOL),
        })?;

    if start >= total_shards {
        return Err(GatewayError::Config(format!(
            "POOL_ID {pool_id} owns no shards out of {total_shards}"
        )));
    }

    let end = start.saturating_add(SHARDS_PER_POOL).min(total_shards);
    Ok((start, end))
}
