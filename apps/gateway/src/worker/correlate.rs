//! One-shot request/reply correlation over the worker message stream
//!
//! Each pending request is a temporary subscriber. Every inbound message
//! is offered to every pending subscriber; a subscriber drops out once it
//! sees its reply and ignores everything else.

use crate::error::GatewayError;
use crate::protocol::{GatewayStatus, SessionDetails, WorkerMessage};
use tokio::sync::oneshot;

pub(crate) type ConnectReply = Result<GatewayStatus, GatewayError>;

/// A request waiting for its reply
#[derive(Debug)]
pub(crate) enum Correlator {
    /// Resolved by `GATEWAY_STATUS`, rejected by `CANNOT_RECONNECT`
    Connect(oneshot::Sender<ConnectReply>),
    /// Resolved by `FETCH_SESSION_DATA`
    SessionData(oneshot::Sender<SessionDetails>),
}

/// What happened when a message was offered to a correlator
#[derive(Debug)]
enum Offer {
    /// Not this correlator's reply; keep listening
    Pending(Correlator),
    Resolved,
    /// Connect was rejected; the shard must be shut down
    Rejected,
}

impl Correlator {
    fn offer(self, shard_id: u32, message: &WorkerMessage) -> Offer {
        match (self, message) {
            (Correlator::Connect(reply), WorkerMessage::GatewayStatus(status)) => {
                let _ = reply.send(Ok(*status));
                Offer::Resolved
            }
            (Correlator::Connect(reply), WorkerMessage::CannotReconnect(close)) => {
                let _ = reply.send(Err(GatewayError::CannotReconnect {
                    shard_id,
                    code: close.code,
                    reason: close.reason.clone(),
                }));
                Offer::Rejected
            }
            (Correlator::SessionData(reply), WorkerMessage::FetchSessionData(details)) => {
                let _ = reply.send(details.clone());
                Offer::Resolved
            }
            (pending, _) => Offer::Pending(pending),
        }
    }

    fn is_abandoned(&self) -> bool {
        match self {
            Correlator::Connect(reply) => reply.is_closed(),
            Correlator::SessionData(reply) => reply.is_closed(),
        }
    }
}

/// Result of offering one message to all pending correlators
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub resolved: usize,
    /// At least one pending connect was rejected
    pub rejected: bool,
}

/// Pending correlators of one worker channel
#[derive(Debug, Default)]
pub(crate) struct Correlators {
    pending: Vec<Correlator>,
}

impl Correlators {
    pub fn register(&mut self, correlator: Correlator) {
        // Callers that gave up on their reply no longer need a slot
        self.pending.retain(|pending| !pending.is_abandoned());
        self.pending.push(correlator);
    }

    pub fn deliver(&mut self, shard_id: u32, message: &WorkerMessage) -> Delivery {
        let mut delivery = Delivery::default();
        let pending = std::mem::take(&mut self.pending);

        for correlator in pending {
            match correlator.offer(shard_id, message) {
                Offer::Pending(correlator) => self.pending.push(correlator),
                Offer::Resolved => delivery.resolved += 1,
                Offer::Rejected => {
                    delivery.resolved += 1;
                    delivery.rejected = true;
                }
            }
        }

        delivery
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
