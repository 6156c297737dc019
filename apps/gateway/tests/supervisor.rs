//! Shard supervisor behaviour against scripted workers
//!
//! Workers are driven by hand through their `WorkerContext`; the manager
//! records every call so tests can wait for a specific one.

use gateway_shard::error::{GatewayError, WorkerError};
use gateway_shard::protocol::{
    CloseInfo, DispatchPayload, GatewayStatus, SendPayload, SessionDetails, SupervisorMessage,
    WorkerMessage,
};
use gateway_shard::shard::{
    ManagerOptions, ShardManager, ShardStatus, ShardSupervisor, PING_UNKNOWN,
};
use gateway_shard::worker::{
    channel, TaskSpawner, WorkerContext, WorkerData, WorkerHandle, WorkerSpawner,
};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use twilight_gateway::Intents;
use twilight_model::gateway::OpCode;

const WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Debug(String),
    Error(u32, WorkerError),
    Emit(String, DispatchPayload),
    Restart(u32),
    Identify(u32),
}

struct RecordingManager {
    options: ManagerOptions,
    calls: mpsc::UnboundedSender<Call>,
}

impl ShardManager for RecordingManager {
    fn options(&self) -> &ManagerOptions {
        &self.options
    }

    fn debug(&self, message: String) {
        let _ = self.calls.send(Call::Debug(message));
    }

    fn error(&self, shard_id: u32, error: &WorkerError) {
        let _ = self.calls.send(Call::Error(shard_id, error.clone()));
    }

    fn emit(&self, event: &str, payload: DispatchPayload) {
        let _ = self.calls.send(Call::Emit(event.to_string(), payload));
    }

    fn schedule_shard_restart(&self, shard: &ShardSupervisor) {
        let _ = self.calls.send(Call::Restart(shard.id()));
    }

    fn schedule_identify(&self, shard: &ShardSupervisor) {
        let _ = self.calls.send(Call::Identify(shard.id()));
    }
}

/// A spawned worker, handed to the test to script
struct MockWorker {
    data: WorkerData,
    ctx: WorkerContext,
    task: JoinHandle<()>,
}

struct MockSpawner {
    workers: mpsc::UnboundedSender<MockWorker>,
    spawns: AtomicUsize,
    fail: AtomicBool,
    /// Shard whose `has_worker()` is sampled on every spawn
    observe: Mutex<Option<ShardSupervisor>>,
    observed: Mutex<Vec<bool>>,
}

impl MockSpawner {
    fn new(workers: mpsc::UnboundedSender<MockWorker>) -> Self {
        Self {
            workers,
            spawns: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            observe: Mutex::new(None),
            observed: Mutex::new(Vec::new()),
        }
    }
}

impl WorkerSpawner for MockSpawner {
    fn spawn(&self, data: WorkerData) -> Result<WorkerHandle, GatewayError> {
        let [shard_id, _] = data.options.shard();
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::WorkerSpawn {
                shard_id,
                reason: "no capacity".to_string(),
            });
        }

        if let Some(ref shard) = *self.observe.lock() {
            self.observed.lock().push(shard.has_worker());
        }

        self.spawns.fetch_add(1, Ordering::SeqCst);
        let (handle, ctx) = channel();
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = handle.with_abort(task.abort_handle());
        let _ = self.workers.send(MockWorker { data, ctx, task });
        Ok(handle)
    }
}

struct Harness {
    shard: ShardSupervisor,
    spawner: Arc<MockSpawner>,
    workers: mpsc::UnboundedReceiver<MockWorker>,
    calls: mpsc::UnboundedReceiver<Call>,
}

impl Harness {
    fn new() -> Self {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (workers_tx, workers) = mpsc::unbounded_channel();

        let mut additional_options = Map::new();
        additional_options.insert("large_threshold".to_string(), json!(100));

        let manager = Arc::new(RecordingManager {
            options: ManagerOptions {
                gateway_version: 10,
                intents: Intents::GUILDS,
                additional_options,
            },
            calls: calls_tx,
        });
        let spawner = Arc::new(MockSpawner::new(workers_tx));

        let shard = ShardSupervisor::new(
            2,
            4,
            "wss://gateway.discord.gg",
            manager,
            Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        )
        .unwrap();

        Self {
            shard,
            spawner,
            workers,
            calls,
        }
    }

    fn spawns(&self) -> usize {
        self.spawner.spawns.load(Ordering::SeqCst)
    }

    fn connect(&self) -> JoinHandle<Result<GatewayStatus, GatewayError>> {
        let shard = self.shard.clone();
        tokio::spawn(async move { shard.connect("token").await })
    }

    async fn next_worker(&mut self) -> MockWorker {
        timeout(WAIT, self.workers.recv())
            .await
            .expect("no worker spawned")
            .expect("spawner dropped")
    }

    /// Connect and answer READY; returns the running worker
    async fn connected(&mut self) -> MockWorker {
        let connect = self.connect();
        let worker = self.next_worker().await;
        worker.ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));
        let status = connect.await.unwrap().unwrap();
        assert_eq!(status, GatewayStatus::Ready);
        worker
    }

    async fn wait_for(&mut self, wanted: &Call) {
        loop {
            let call = timeout(WAIT, self.calls.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
                .expect("manager dropped");
            if &call == wanted {
                return;
            }
        }
    }

    fn drain(&mut self) -> Vec<Call> {
        let mut calls = Vec::new();
        while let Ok(call) = self.calls.try_recv() {
            calls.push(call);
        }
        calls
    }
}

async fn recv_command(worker: &mut MockWorker) -> SupervisorMessage {
    timeout(WAIT, worker.ctx.recv())
        .await
        .expect("no command received")
        .expect("supervisor dropped the worker")
}

/// Round trip a debug message so every earlier worker message is processed
async fn barrier(harness: &mut Harness, worker: &MockWorker) {
    worker.ctx.debug("barrier");
    harness
        .wait_for(&Call::Debug("[Shard 2/4] barrier".to_string()))
        .await;
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn shard_id_must_be_below_total() {
    let (calls, _rx) = mpsc::unbounded_channel();
    let (workers, _workers_rx) = mpsc::unbounded_channel();
    let manager = Arc::new(RecordingManager {
        options: ManagerOptions::default(),
        calls,
    });
    let spawner = Arc::new(MockSpawner::new(workers));

    let err = ShardSupervisor::new(4, 4, "wss://gateway.discord.gg", manager, spawner).unwrap_err();
    assert!(matches!(err, GatewayError::InvalidShard { id: 4, total: 4 }));
}

#[tokio::test]
async fn new_shard_is_idle() {
    let harness = Harness::new();

    assert_eq!(harness.shard.id(), 2);
    assert_eq!(harness.shard.total_shards(), 4);
    assert_eq!(harness.shard.status(), ShardStatus::Disconnected);
    assert_eq!(harness.shard.ping(), PING_UNKNOWN);
    assert!(!harness.shard.has_worker());
    assert!(!harness.shard.is_destroyed());
    assert_eq!(harness.spawns(), 0);
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_spawns_worker_with_startup_data() {
    let mut harness = Harness::new();
    let connect = harness.connect();

    let mut worker = harness.next_worker().await;
    assert_eq!(worker.data.options.shard(), [2, 4]);
    assert_eq!(worker.data.options.intents(), Intents::GUILDS.bits());
    assert_eq!(worker.data.options.get("large_threshold"), Some(&json!(100)));
    assert_eq!(worker.data.token, "token");
    assert_eq!(worker.data.gateway_version, 10);
    assert_eq!(worker.data.gateway_url, "wss://gateway.discord.gg");

    worker.ctx.set_status(ShardStatus::Connecting);
    worker.ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));

    assert_eq!(connect.await.unwrap().unwrap(), GatewayStatus::Ready);
    assert_eq!(harness.shard.status(), ShardStatus::Connecting);
    assert_eq!(harness.spawns(), 1);
    assert!(harness.shard.has_worker());

    // A fresh worker identifies on its own
    assert!(worker.ctx.try_recv().is_none());
}

#[tokio::test]
async fn second_connect_reuses_running_worker() {
    let mut harness = Harness::new();
    let mut worker = harness.connected().await;

    let connect = harness.connect();
    assert_eq!(recv_command(&mut worker).await, SupervisorMessage::Identify);
    worker
        .ctx
        .send(WorkerMessage::GatewayStatus(GatewayStatus::InvalidSession));

    assert_eq!(
        connect.await.unwrap().unwrap(),
        GatewayStatus::InvalidSession
    );
    assert_eq!(harness.spawns(), 1);
}

#[tokio::test]
async fn one_reply_resolves_every_pending_connect() {
    let mut harness = Harness::new();
    let first = harness.connect();
    let mut worker = harness.next_worker().await;

    let second = harness.connect();
    assert_eq!(recv_command(&mut worker).await, SupervisorMessage::Identify);

    worker.ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));

    assert_eq!(first.await.unwrap().unwrap(), GatewayStatus::Ready);
    assert_eq!(second.await.unwrap().unwrap(), GatewayStatus::Ready);
    assert_eq!(harness.spawns(), 1);
}

#[tokio::test]
async fn gateway_status_leaves_status_and_ping_alone() {
    let mut harness = Harness::new();
    let _worker = harness.connected().await;

    assert_eq!(harness.shard.status(), ShardStatus::Disconnected);
    assert_eq!(harness.shard.ping(), PING_UNKNOWN);
}

#[tokio::test]
async fn cannot_reconnect_rejects_connect_and_destroys_shard() {
    let mut harness = Harness::new();
    let connect = harness.connect();
    let mut worker = harness.next_worker().await;

    worker.ctx.send(WorkerMessage::CannotReconnect(CloseInfo::new(
        4004,
        "Authentication failed.",
    )));

    let err = connect.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "WebSocket closed with code 4004: Authentication failed.");
    assert!(matches!(
        err,
        GatewayError::CannotReconnect {
            shard_id: 2,
            code: 4004,
            ..
        }
    ));

    assert!(harness.shard.is_destroyed());
    assert!(!harness.shard.has_worker());
    assert_eq!(recv_command(&mut worker).await, SupervisorMessage::Destroy);

    let join = timeout(WAIT, worker.task).await.expect("worker not terminated");
    assert!(join.unwrap_err().is_cancelled());

    // Sends after destruction go nowhere
    harness
        .shard
        .send(SendPayload::new(OpCode::Heartbeat, json!(null)));
    assert!(worker.ctx.try_recv().is_none());

    // The terminated worker's exit does not trigger a restart
    worker.ctx.reporter().exit(1);
    harness
        .wait_for(&Call::Debug("[Shard 2/4] Worker Thread Exit[1]".to_string()))
        .await;
    settle().await;
    assert!(!harness
        .drain()
        .iter()
        .any(|call| matches!(call, Call::Restart(_))));
}

#[tokio::test]
async fn connect_after_destroy_fails() {
    let harness = Harness::new();
    harness.shard.destroy();

    let err = harness.shard.connect("token").await.unwrap_err();
    assert!(matches!(err, GatewayError::ShardDestroyed { shard_id: 2 }));
    assert_eq!(harness.spawns(), 0);
}

#[tokio::test]
async fn worker_exit_fails_pending_connect() {
    let mut harness = Harness::new();
    let connect = harness.connect();
    let worker = harness.next_worker().await;

    worker.ctx.reporter().exit(1);

    let err = connect.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::WorkerGone { shard_id: 2 }));
    harness.wait_for(&Call::Restart(2)).await;
}

#[tokio::test]
async fn spawner_may_read_shard_state() {
    let mut harness = Harness::new();
    *harness.spawner.observe.lock() = Some(harness.shard.clone());

    let _worker = harness.connected().await;

    assert_eq!(*harness.spawner.observed.lock(), vec![false]);
    assert!(harness.shard.has_worker());

    // Break the spawner -> shard -> spawner cycle
    harness.spawner.observe.lock().take();
}

#[tokio::test]
async fn spawn_failure_is_returned() {
    let harness = Harness::new();
    harness.spawner.fail.store(true, Ordering::SeqCst);

    let err = harness.shard.connect("token").await.unwrap_err();
    assert!(matches!(err, GatewayError::WorkerSpawn { shard_id: 2, .. }));
    assert!(!harness.shard.has_worker());
}

// ---------------------------------------------------------------------------
// Worker lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exit_without_destroy_requests_restart() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker.ctx.reporter().exit(0);

    harness
        .wait_for(&Call::Debug("[Shard 2/4] Worker Thread Exit[0]".to_string()))
        .await;
    harness.wait_for(&Call::Restart(2)).await;
    assert!(!harness.shard.has_worker());

    // The next connect starts a new worker
    let _second = harness.connected().await;
    assert_eq!(harness.spawns(), 2);
}

#[tokio::test]
async fn closed_event_stream_counts_as_exit() {
    let mut harness = Harness::new();
    let connect = harness.connect();
    let worker = harness.next_worker().await;

    // Worker vanishes without reporting an exit
    let MockWorker { ctx, task, .. } = worker;
    drop(ctx);
    task.abort();

    let err = timeout(WAIT, connect)
        .await
        .expect("connect still pending")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, GatewayError::WorkerGone { shard_id: 2 }));

    harness.wait_for(&Call::Restart(2)).await;
    assert!(!harness.shard.has_worker());

    // Next connect spawns instead of identifying on the dead channel
    let _second = harness.connected().await;
    assert_eq!(harness.spawns(), 2);
}

#[tokio::test]
async fn discarded_worker_cannot_touch_the_mirror() {
    let mut harness = Harness::new();
    let connect = harness.connect();
    let worker = harness.next_worker().await;

    worker.ctx.send(WorkerMessage::CannotReconnect(CloseInfo::new(
        4014,
        "Disallowed intent(s).",
    )));
    assert!(connect.await.unwrap().is_err());
    assert!(!harness.shard.has_worker());

    worker.ctx.set_status(ShardStatus::Connected);
    worker.ctx.send(WorkerMessage::UpdatePing(99));
    worker.ctx.send(WorkerMessage::Dispatch(DispatchPayload::new(
        "GUILD_CREATE",
        json!({}),
    )));
    worker.ctx.reporter().exit(1);
    harness
        .wait_for(&Call::Debug("[Shard 2/4] Worker Thread Exit[1]".to_string()))
        .await;

    assert_eq!(harness.shard.status(), ShardStatus::Disconnected);
    assert_eq!(harness.shard.ping(), PING_UNKNOWN);
    assert!(!harness
        .drain()
        .iter()
        .any(|call| matches!(call, Call::Emit(..) | Call::Restart(_))));
}

#[tokio::test]
async fn destroy_then_exit_does_not_restart() {
    let mut harness = Harness::new();
    let mut worker = harness.connected().await;

    harness.shard.destroy();
    assert_eq!(recv_command(&mut worker).await, SupervisorMessage::Destroy);

    worker.ctx.reporter().exit(0);
    harness
        .wait_for(&Call::Debug("[Shard 2/4] Worker Thread Exit[0]".to_string()))
        .await;
    settle().await;

    assert!(!harness
        .drain()
        .iter()
        .any(|call| matches!(call, Call::Restart(_))));
    assert!(!harness.shard.has_worker());
    assert!(harness.shard.is_destroyed());
}

#[tokio::test]
async fn worker_error_is_forwarded() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker
        .ctx
        .reporter()
        .error(WorkerError::Gateway("connection reset".to_string()));

    harness
        .wait_for(&Call::Error(
            2,
            WorkerError::Gateway("connection reset".to_string()),
        ))
        .await;
    assert!(harness.shard.has_worker());
}

#[tokio::test]
async fn online_worker_through_task_spawner() {
    let (calls_tx, mut calls) = mpsc::unbounded_channel();
    let manager = Arc::new(RecordingManager {
        options: ManagerOptions::default(),
        calls: calls_tx,
    });
    let spawner = Arc::new(TaskSpawner::new(|_data, mut ctx: WorkerContext| async move {
        ctx.set_status(ShardStatus::Connected);
        ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));
        while let Some(command) = ctx.recv().await {
            if command == SupervisorMessage::Destroy {
                break;
            }
        }
        Ok::<(), WorkerError>(())
    }));

    let shard = ShardSupervisor::new(0, 1, "wss://gateway.discord.gg", manager, spawner).unwrap();

    assert_eq!(shard.connect("token").await.unwrap(), GatewayStatus::Ready);
    assert_eq!(shard.status(), ShardStatus::Connected);

    shard.destroy();

    let mut seen = Vec::new();
    while let Ok(Some(call)) = timeout(WAIT, calls.recv()).await {
        let done = call == Call::Debug("[Shard 0/1] Worker Thread Exit[0]".to_string());
        seen.push(call);
        if done {
            break;
        }
    }

    assert!(seen.contains(&Call::Debug("[Shard 0/1] Worker Thread Online".to_string())));
    assert!(seen.contains(&Call::Debug(
        "[Shard 0/1] Shard Status Update: CONNECTED".to_string()
    )));
    assert_eq!(
        seen.last(),
        Some(&Call::Debug("[Shard 0/1] Worker Thread Exit[0]".to_string()))
    );
    assert!(!seen.iter().any(|call| matches!(call, Call::Restart(_))));
    assert!(!shard.has_worker());
}

// ---------------------------------------------------------------------------
// Routed messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_mirrors_last_update() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker.ctx.set_status(ShardStatus::Connecting);
    worker.ctx.set_status(ShardStatus::Resuming);
    worker.ctx.set_status(ShardStatus::Connected);

    harness
        .wait_for(&Call::Debug(
            "[Shard 2/4] Shard Status Update: RESUMING".to_string(),
        ))
        .await;
    barrier(&mut harness, &worker).await;

    assert_eq!(harness.shard.status(), ShardStatus::Connected);
}

#[tokio::test]
async fn debug_messages_are_prefixed() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker.ctx.debug("Hello received");

    harness
        .wait_for(&Call::Debug("[Shard 2/4] Hello received".to_string()))
        .await;
}

#[tokio::test]
async fn dispatch_is_stamped_and_emitted() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    let payload = DispatchPayload::new("GUILD_CREATE", json!({ "id": "1" }));
    worker.ctx.send(WorkerMessage::Dispatch(payload.clone()));

    harness
        .wait_for(&Call::Emit("GUILD_CREATE".to_string(), payload.stamp(2)))
        .await;
}

#[tokio::test]
async fn schedule_identify_is_forwarded() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker.ctx.send(WorkerMessage::ScheduleIdentify);

    harness.wait_for(&Call::Identify(2)).await;
}

#[tokio::test]
async fn update_ping_is_mirrored() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker.ctx.send(WorkerMessage::UpdatePing(42));
    barrier(&mut harness, &worker).await;

    assert_eq!(harness.shard.ping(), 42);
}

#[tokio::test]
async fn payload_dispatch_from_worker_is_ignored() {
    let mut harness = Harness::new();
    let worker = harness.connected().await;

    worker
        .ctx
        .send(WorkerMessage::PayloadDispatch(SendPayload::new(
            OpCode::Heartbeat,
            json!(1),
        )));
    barrier(&mut harness, &worker).await;

    assert!(harness.drain().is_empty());
    assert_eq!(harness.shard.status(), ShardStatus::Disconnected);
}

// ---------------------------------------------------------------------------
// send / restart / fetch_session_data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_relays_payload_to_worker() {
    let mut harness = Harness::new();

    // No worker yet: dropped
    harness
        .shard
        .send(SendPayload::new(OpCode::Heartbeat, json!(null)));
    assert_eq!(harness.spawns(), 0);

    let mut worker = harness.connected().await;
    let payload = SendPayload::new(OpCode::RequestGuildMembers, json!({ "guild_id": "1" }));
    harness.shard.send(payload.clone());

    assert_eq!(
        recv_command(&mut worker).await,
        SupervisorMessage::PayloadDispatch(payload)
    );
}

#[tokio::test]
async fn restart_reconnects_running_worker() {
    let mut harness = Harness::new();
    let mut worker = harness.connected().await;

    harness.shard.restart();

    assert_eq!(recv_command(&mut worker).await, SupervisorMessage::Reconnect);
    assert!(!harness
        .drain()
        .iter()
        .any(|call| matches!(call, Call::Restart(_))));
}

#[tokio::test]
async fn restart_without_worker_asks_manager() {
    let mut harness = Harness::new();

    harness.shard.restart();

    assert_eq!(harness.drain(), vec![Call::Restart(2)]);
    assert_eq!(harness.spawns(), 0);
}

#[tokio::test]
async fn fetch_session_data_needs_a_worker() {
    let harness = Harness::new();

    let err = harness.shard.fetch_session_data().await.unwrap_err();
    assert!(matches!(err, GatewayError::NoWorker { shard_id: 2 }));
}

#[tokio::test]
async fn fetch_session_data_returns_worker_reply() {
    let mut harness = Harness::new();
    let mut worker = harness.connected().await;

    let shard = harness.shard.clone();
    let fetch = tokio::spawn(async move { shard.fetch_session_data().await });

    assert_eq!(
        recv_command(&mut worker).await,
        SupervisorMessage::FetchSessionData
    );

    let details = SessionDetails {
        session_id: Some("abc".to_string()),
        sequence: Some(7),
    };
    worker
        .ctx
        .send(WorkerMessage::FetchSessionData(details.clone()));

    assert_eq!(fetch.await.unwrap().unwrap(), details);
}
