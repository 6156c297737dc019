//! Per-shard supervisor
//!
//! Owns at most one connection worker, mirrors the status the worker
//! reports, and correlates `connect`/`fetch_session_data` requests with the
//! worker's replies. The supervisor never speaks the gateway protocol.
//!
//! Inbound worker messages fan out to two kinds of subscribers:
//! - the router, always active, for debug/ping/identify/dispatch/status
//! - one-shot correlators, registered per pending request

use crate::error::{GatewayError, WorkerError};
use crate::metrics;
use crate::protocol::{GatewayStatus, SendPayload, SessionDetails, SupervisorMessage, WorkerMessage};
use crate::shard::{ShardManager, ShardStatus};
use crate::worker::correlate::{ConnectReply, Correlator, Correlators};
use crate::worker::{
    WorkerData, WorkerEvent, WorkerHandle, WorkerOptions, WorkerSpawner, EXIT_FAILURE,
};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Ping value before the first heartbeat acknowledgement
pub const PING_UNKNOWN: i64 = -1;

/// Supervisor for one gateway shard.
///
/// Cheap to clone; all clones share the same shard.
#[derive(Clone)]
pub struct ShardSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    id: u32,
    total_shards: u32,
    gateway_url: String,
    manager: Arc<dyn ShardManager>,
    spawner: Arc<dyn WorkerSpawner>,
    runtime: Mutex<Runtime>,
}

/// Mutable shard state. The lock is never held across a call into the
/// manager or an await point.
struct Runtime {
    status: ShardStatus,
    ping: i64,
    destroyed: bool,
    worker: Option<ActiveWorker>,
    /// Incremented per spawn so late events from a discarded worker are recognised
    generation: u64,
}

struct ActiveWorker {
    generation: u64,
    handle: WorkerHandle,
    correlators: Correlators,
}

impl ActiveWorker {
    fn send(&self, shard_id: u32, message: SupervisorMessage) {
        let action = message.action();
        if !self.handle.send(message) {
            debug!(shard_id, %action, "Worker channel closed, action dropped");
        }
    }
}

impl ShardSupervisor {
    /// Create a supervisor for shard `id` of `total_shards`.
    ///
    /// No worker is started until the first [`connect`](Self::connect).
    pub fn new(
        id: u32,
        total_shards: u32,
        gateway_url: impl Into<String>,
        manager: Arc<dyn ShardManager>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, GatewayError> {
        if id >= total_shards {
            return Err(GatewayError::InvalidShard {
                id,
                total: total_shards,
            });
        }

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                total_shards,
                gateway_url: gateway_url.into(),
                manager,
                spawner,
                runtime: Mutex::new(Runtime {
                    status: ShardStatus::Disconnected,
                    ping: PING_UNKNOWN,
                    destroyed: false,
                    worker: None,
                    generation: 0,
                }),
            }),
        })
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn total_shards(&self) -> u32 {
        self.inner.total_shards
    }

    /// Last status reported by the worker
    pub fn status(&self) -> ShardStatus {
        self.inner.runtime.lock().status
    }

    /// Last heartbeat round trip in milliseconds, [`PING_UNKNOWN`] if never measured
    pub fn ping(&self) -> i64 {
        self.inner.runtime.lock().ping
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.runtime.lock().destroyed
    }

    /// Whether a worker is currently owned by this shard
    pub fn has_worker(&self) -> bool {
        self.inner.runtime.lock().worker.is_some()
    }

    /// Connect the shard to the gateway.
    ///
    /// Spawns a worker if there is none, otherwise asks the running worker
    /// to identify again. Resolves with the worker's `GATEWAY_STATUS`, or
    /// fails with [`GatewayError::CannotReconnect`] after which the shard is
    /// destroyed and its worker terminated.
    ///
    /// There is no timeout. Callers must not issue a second `connect` while
    /// one is pending.
    pub async fn connect(&self, token: impl Into<String>) -> Result<GatewayStatus, GatewayError> {
        let shard_id = self.inner.id;
        let (reply_tx, reply_rx) = oneshot::channel();

        if let Some(reply_tx) = self.identify_running(reply_tx)? {
            self.spawn_worker(token.into(), reply_tx)?;
        }

        let result = reply_rx
            .await
            .unwrap_or_else(|_| Err(GatewayError::WorkerGone { shard_id }));

        if let Err(ref e) = result {
            metrics::record_connect_failure(shard_id, e);
            warn!(shard_id, error = %e, "Shard connect failed");
        }
        result
    }

    /// Ask a running worker to identify. Hands the reply sender back if
    /// there is no worker yet.
    fn identify_running(
        &self,
        reply_tx: oneshot::Sender<ConnectReply>,
    ) -> Result<Option<oneshot::Sender<ConnectReply>>, GatewayError> {
        let shard_id = self.inner.id;
        let mut rt = self.inner.runtime.lock();
        if rt.destroyed {
            return Err(GatewayError::ShardDestroyed { shard_id });
        }

        match rt.worker.as_mut() {
            Some(worker) => {
                worker.correlators.register(Correlator::Connect(reply_tx));
                worker.send(shard_id, SupervisorMessage::Identify);
                debug!(shard_id, "Requested identify from running worker");
                Ok(None)
            }
            None => Ok(Some(reply_tx)),
        }
    }

    fn spawn_worker(
        &self,
        token: String,
        reply_tx: oneshot::Sender<ConnectReply>,
    ) -> Result<(), GatewayError> {
        let shard_id = self.inner.id;

        // Spawners run without the runtime lock and may read shard state
        let mut handle = self.inner.spawner.spawn(self.worker_data(token))?;
        let Some(events) = handle.take_events() else {
            handle.terminate();
            return Err(GatewayError::WorkerSpawn {
                shard_id,
                reason: "worker event stream already taken".to_string(),
            });
        };

        let generation = {
            let mut rt = self.inner.runtime.lock();
            if rt.destroyed {
                handle.terminate();
                return Err(GatewayError::ShardDestroyed { shard_id });
            }

            if let Some(worker) = rt.worker.as_mut() {
                // Another connect installed a worker while this one was spawning
                handle.terminate();
                worker.correlators.register(Correlator::Connect(reply_tx));
                worker.send(shard_id, SupervisorMessage::Identify);
                return Ok(());
            }

            rt.generation += 1;
            let mut correlators = Correlators::default();
            correlators.register(Correlator::Connect(reply_tx));
            rt.worker = Some(ActiveWorker {
                generation: rt.generation,
                handle,
                correlators,
            });
            rt.generation
        };

        metrics::record_worker_spawn(shard_id);
        info!(shard_id, total_shards = self.inner.total_shards, generation, "Spawned connection worker");
        tokio::spawn(self.clone().pump(generation, events));
        Ok(())
    }

    /// Gracefully shut the shard down.
    ///
    /// Latches the shard as destroyed so the worker's eventual exit is not
    /// followed by a restart, then asks the worker to close.
    pub fn destroy(&self) {
        let mut rt = self.inner.runtime.lock();
        rt.destroyed = true;
        if let Some(ref worker) = rt.worker {
            worker.send(self.inner.id, SupervisorMessage::Destroy);
        }
        info!(shard_id = self.inner.id, "Shard destroyed");
    }

    /// Relay a gateway command to the worker. Dropped if there is no worker.
    pub fn send(&self, payload: SendPayload) {
        self.dispatch(SupervisorMessage::PayloadDispatch(payload));
    }

    /// Reconnect in place, or ask the orchestrator for a restart if there is
    /// no worker to reconnect.
    pub fn restart(&self) {
        if self.dispatch(SupervisorMessage::Reconnect) {
            return;
        }

        metrics::record_restart_request(self.inner.id);
        self.inner.manager.schedule_shard_restart(self);
    }

    /// Ask the worker for its session details
    pub async fn fetch_session_data(&self) -> Result<SessionDetails, GatewayError> {
        let shard_id = self.inner.id;
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut rt = self.inner.runtime.lock();
            let worker = rt
                .worker
                .as_mut()
                .ok_or(GatewayError::NoWorker { shard_id })?;
            worker.correlators.register(Correlator::SessionData(reply_tx));
            worker.send(shard_id, SupervisorMessage::FetchSessionData);
        }

        reply_rx
            .await
            .map_err(|_| GatewayError::WorkerGone { shard_id })
    }

    /// Send an action to the worker if there is one
    fn dispatch(&self, message: SupervisorMessage) -> bool {
        let rt = self.inner.runtime.lock();
        match rt.worker {
            Some(ref worker) => {
                worker.send(self.inner.id, message);
                true
            }
            None => {
                trace!(shard_id = self.inner.id, action = %message.action(), "No worker, action dropped");
                false
            }
        }
    }

    fn worker_data(&self, token: String) -> WorkerData {
        let options = self.inner.manager.options();
        WorkerData {
            gateway_url: self.inner.gateway_url.clone(),
            gateway_version: options.gateway_version,
            token,
            options: WorkerOptions::new(
                options.additional_options.clone(),
                options.intents.bits(),
                [self.inner.id, self.inner.total_shards],
            ),
        }
    }

    fn prefix(&self) -> String {
        format!("[Shard {}/{}]", self.inner.id, self.inner.total_shards)
    }

    /// Drain one worker's event stream until it exits
    async fn pump(self, generation: u64, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Online => self.on_online(),
                WorkerEvent::Message(message) => self.on_message(generation, message),
                WorkerEvent::Error(error) => self.on_error(&error),
                WorkerEvent::Exit(code) => {
                    self.on_exit(generation, code);
                    return;
                }
            }
        }

        // Stream closed without an exit report
        debug!(shard_id = self.inner.id, generation, "Worker event stream ended");
        self.on_exit(generation, EXIT_FAILURE);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner
            .runtime
            .lock()
            .worker
            .as_ref()
            .is_some_and(|worker| worker.generation == generation)
    }

    fn on_online(&self) {
        debug!(shard_id = self.inner.id, "Worker online");
        self.inner
            .manager
            .debug(format!("{} Worker Thread Online", self.prefix()));
    }

    fn on_message(&self, generation: u64, message: WorkerMessage) {
        if !self.is_current(generation) {
            trace!(shard_id = self.inner.id, generation, action = %message.action(), "Dropping message from discarded worker");
            return;
        }
        self.correlate(generation, &message);
        self.route(message);
    }

    /// Offer a message to the pending correlators of the current worker
    fn correlate(&self, generation: u64, message: &WorkerMessage) {
        let shard_id = self.inner.id;
        let delivery = {
            let mut rt = self.inner.runtime.lock();
            match rt.worker {
                Some(ref mut worker) if worker.generation == generation => {
                    let delivery = worker.correlators.deliver(shard_id, message);
                    if delivery.resolved > 0 {
                        trace!(
                            shard_id,
                            action = %message.action(),
                            still_pending = worker.correlators.len(),
                            "Resolved pending requests"
                        );
                    }
                    delivery
                }
                _ => return,
            }
        };

        if delivery.rejected {
            self.shutdown_rejected(generation);
        }
    }

    /// Permanent handling of routed actions
    fn route(&self, message: WorkerMessage) {
        let shard_id = self.inner.id;
        let manager = &self.inner.manager;

        match message {
            WorkerMessage::Debug(text) => {
                manager.debug(format!("{} {}", self.prefix(), text));
            }
            WorkerMessage::UpdatePing(ping) => {
                self.inner.runtime.lock().ping = ping;
                metrics::set_ping(shard_id, ping);
            }
            WorkerMessage::ScheduleIdentify => {
                metrics::record_identify_request(shard_id);
                manager.schedule_identify(self);
            }
            WorkerMessage::Dispatch(payload) => {
                let payload = payload.stamp(shard_id);
                let event = payload.t.clone();
                metrics::record_dispatch(shard_id, &event);
                manager.emit(&event, payload);
            }
            WorkerMessage::ConnectionStatusUpdate(status) => {
                self.inner.runtime.lock().status = status;
                metrics::set_status(shard_id, status);
                debug!(shard_id, %status, "Shard status update");
                manager.debug(format!("{} Shard Status Update: {}", self.prefix(), status));
            }
            WorkerMessage::PayloadDispatch(_) => {
                trace!(shard_id, "Ignoring payload dispatch from worker");
            }
            // Correlated replies, or nothing to do
            WorkerMessage::Identify
            | WorkerMessage::GatewayStatus(_)
            | WorkerMessage::CannotReconnect(_)
            | WorkerMessage::FetchSessionData(_) => {}
        }
    }

    /// Tear the shard down after the gateway refused a pending connect
    fn shutdown_rejected(&self, generation: u64) {
        self.destroy();

        let mut rt = self.inner.runtime.lock();
        if let Some(worker) = rt.worker.take_if(|worker| worker.generation == generation) {
            worker.handle.terminate();
        }
        warn!(shard_id = self.inner.id, "Gateway refused connection, worker terminated");
    }

    fn on_error(&self, error: &WorkerError) {
        metrics::record_worker_error(self.inner.id);
        warn!(shard_id = self.inner.id, error = %error, "Worker error");
        self.inner
            .manager
            .debug(format!("{} {:?}", self.prefix(), error));
        self.inner.manager.error(self.inner.id, error);
    }

    fn on_exit(&self, generation: u64, code: i32) {
        let shard_id = self.inner.id;
        metrics::record_worker_exit(shard_id, code);
        self.inner
            .manager
            .debug(format!("{} Worker Thread Exit[{}]", self.prefix(), code));

        let (cleared, destroyed) = {
            let mut rt = self.inner.runtime.lock();
            let taken = rt.worker.take_if(|worker| worker.generation == generation);
            if let Some(ref worker) = taken {
                worker.handle.terminate();
            }
            (taken.is_some(), rt.destroyed)
        };

        info!(shard_id, exit_code = code, destroyed, "Worker exited");

        if cleared && !destroyed {
            metrics::record_restart_request(shard_id);
            self.inner.manager.schedule_shard_restart(self);
        }
    }
}

impl fmt::Debug for ShardSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rt = self.inner.runtime.lock();
        f.debug_struct("ShardSupervisor")
            .field("id", &self.inner.id)
            .field("total_shards", &self.inner.total_shards)
            .field("status", &rt.status)
            .field("ping", &rt.ping)
            .field("destroyed", &rt.destroyed)
            .field("worker", &rt.worker.is_some())
            .finish()
    }
}
