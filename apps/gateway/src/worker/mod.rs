//! Connection worker boundary
//!
//! A worker is an isolated execution unit owning one gateway socket. The
//! supervisor sees it only through a [`WorkerHandle`]: send an action,
//! receive lifecycle events, terminate. The worker sees the other end of
//! the same channel pair as a [`WorkerContext`].

pub(crate) mod correlate;
mod task;
pub mod twilight;

pub use task::{TaskSpawner, EXIT_FAILURE};

use crate::error::{GatewayError, WorkerError};
use crate::protocol::{SupervisorMessage, WorkerMessage};
use crate::shard::ShardStatus;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Everything a worker can report, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The worker started running
    Online,
    /// A protocol action
    Message(WorkerMessage),
    /// The worker hit an error while alive
    Error(WorkerError),
    /// The worker stopped; no further events follow
    Exit(i32),
}

/// Connection options frozen at spawn time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerOptions {
    #[serde(flatten)]
    additional: Map<String, Value>,
    intents: u64,
    shard: [u32; 2],
}

impl WorkerOptions {
    /// Merge additional options with the composed intents and shard tuple.
    /// `intents` and `shard` always win over same-named additional keys.
    pub fn new(mut additional: Map<String, Value>, intents: u64, shard: [u32; 2]) -> Self {
        additional.remove("intents");
        additional.remove("shard");
        Self {
            additional,
            intents,
            shard,
        }
    }

    pub fn intents(&self) -> u64 {
        self.intents
    }

    /// `[id, total_shards]`
    pub fn shard(&self) -> [u32; 2] {
        self.shard
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.additional.get(key)
    }
}

/// Startup configuration handed to a worker once, at spawn
#[derive(Clone)]
pub struct WorkerData {
    pub gateway_url: String,
    pub gateway_version: u8,
    pub token: String,
    pub options: WorkerOptions,
}

impl fmt::Debug for WorkerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerData")
            .field("gateway_url", &self.gateway_url)
            .field("gateway_version", &self.gateway_version)
            .field("token", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

/// Starts connection workers. Called without any shard lock held.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, data: WorkerData) -> Result<WorkerHandle, GatewayError>;
}

/// Create a connected handle/context pair
pub fn channel() -> (WorkerHandle, WorkerContext) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let handle = WorkerHandle {
        commands: commands_tx,
        events: Some(events_rx),
        abort: None,
    };
    let context = WorkerContext {
        events: events_tx,
        commands: commands_rx,
    };
    (handle, context)
}

/// Supervisor side of a worker
#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<SupervisorMessage>,
    events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
    abort: Option<AbortHandle>,
}

impl WorkerHandle {
    /// Attach the handle used by [`WorkerHandle::terminate`]
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Post an action. Returns false if the worker is no longer listening.
    pub fn send(&self, message: SupervisorMessage) -> bool {
        self.commands.send(message).is_ok()
    }

    /// Stop the worker without waiting for it to shut down on its own
    pub fn terminate(&self) {
        if let Some(ref abort) = self.abort {
            abort.abort();
        }
    }

    /// The event stream; taken once by whoever pumps it
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerEvent>> {
        self.events.take()
    }
}

/// Worker side of the channel
#[derive(Debug)]
pub struct WorkerContext {
    events: mpsc::UnboundedSender<WorkerEvent>,
    commands: mpsc::UnboundedReceiver<SupervisorMessage>,
}

impl WorkerContext {
    /// Report a protocol action
    pub fn send(&self, message: WorkerMessage) -> bool {
        self.report(WorkerEvent::Message(message))
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.send(WorkerMessage::Debug(message.into()));
    }

    pub fn set_status(&self, status: ShardStatus) {
        self.send(WorkerMessage::ConnectionStatusUpdate(status));
    }

    /// Report any event, lifecycle events included
    pub fn report(&self, event: WorkerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Lifecycle reporter that outlives the context
    pub fn reporter(&self) -> WorkerReporter {
        WorkerReporter {
            events: self.events.clone(),
        }
    }

    /// Next supervisor action; `None` once the supervisor dropped the handle
    pub async fn recv(&mut self) -> Option<SupervisorMessage> {
        self.commands.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SupervisorMessage> {
        self.commands.try_recv().ok()
    }
}

/// Reports lifecycle events on behalf of a worker
#[derive(Debug, Clone)]
pub struct WorkerReporter {
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerReporter {
    pub fn online(&self) {
        let _ = self.events.send(WorkerEvent::Online);
    }

    pub fn error(&self, error: WorkerError) {
        let _ = self.events.send(WorkerEvent::Error(error));
    }

    pub fn exit(&self, code: i32) {
        let _ = self.events.send(WorkerEvent::Exit(code));
    }
}
