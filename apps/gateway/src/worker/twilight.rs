//! Connection worker backed by a Twilight gateway shard
//!
//! Runs one `twilight_gateway::Shard` and translates between it and the
//! supervisor protocol. Heartbeating, resume vs. identify, and payload
//! decoding are left to Twilight.

use super::{WorkerContext, WorkerData};
use crate::config::DEFAULT_GATEWAY_URL;
use crate::error::WorkerError;
use crate::events::dispatch_payload;
use crate::protocol::{CloseInfo, GatewayStatus, SessionDetails, SupervisorMessage, WorkerMessage};
use crate::shard::{ShardStatus, DEFAULT_GATEWAY_VERSION};

use tracing::{debug, info, warn};
use twilight_gateway::{
    error::ReceiveMessageErrorType, CloseFrame, ConfigBuilder, EventTypeFlags, Intents, Shard,
    StreamExt as _,
};
use twilight_model::gateway::{event::Event, ShardId};

/// Twilight accepts large thresholds in this range only
const LARGE_THRESHOLD_RANGE: std::ops::RangeInclusive<u64> = 50..=250;

/// Run a connection worker until it is destroyed or the gateway refuses it
pub async fn run(data: WorkerData, mut ctx: WorkerContext) -> Result<(), WorkerError> {
    let [id, total] = data.options.shard();
    if total == 0 || id >= total {
        return Err(WorkerError::InvalidShard { id, total });
    }

    if data.gateway_version != DEFAULT_GATEWAY_VERSION {
        warn!(
            shard_id = id,
            requested = data.gateway_version,
            "Twilight speaks a fixed gateway version, ignoring requested version"
        );
    }

    let mut config = ConfigBuilder::new(data.token, Intents::from_bits_truncate(data.options.intents()));
    if data.gateway_url != DEFAULT_GATEWAY_URL {
        config = config.proxy_url(data.gateway_url);
    }
    if let Some(threshold) = data.options.get("large_threshold").and_then(|v| v.as_u64()) {
        let (min, max) = (*LARGE_THRESHOLD_RANGE.start(), *LARGE_THRESHOLD_RANGE.end());
        config = config.large_threshold(threshold.clamp(min, max));
    }

    let mut shard = Shard::with_config(ShardId::new(id, total), config.build());
    let mut ready = false;
    let mut closing = false;

    info!(shard_id = id, total_shards = total, "Connection worker starting");
    ctx.set_status(ShardStatus::Connecting);

    loop {
        tokio::select! {
            command = ctx.recv() => {
                let Some(command) = command else {
                    debug!(shard_id = id, "Supervisor dropped, worker stopping");
                    return Ok(());
                };

                match command {
                    SupervisorMessage::Destroy => {
                        ctx.debug("Destroy requested, closing connection");
                        closing = true;
                        shard.close(CloseFrame::NORMAL);
                    }
                    SupervisorMessage::Reconnect => {
                        ctx.debug("Reconnect requested");
                        ready = false;
                        ctx.set_status(ShardStatus::Reconnecting);
                        shard.close(CloseFrame::RESUME);
                    }
                    SupervisorMessage::Identify => {
                        if ready {
                            ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));
                        } else {
                            ctx.debug("Identify requested, waiting for the running handshake");
                        }
                    }
                    SupervisorMessage::PayloadDispatch(payload) => match serde_json::to_string(&payload) {
                        Ok(json) => {
                            shard.send(json);
                        }
                        Err(e) => ctx.debug(format!("Dropping unserializable payload: {e}")),
                    },
                    SupervisorMessage::FetchSessionData => {
                        let details = shard
                            .session()
                            .map(|session| SessionDetails {
                                session_id: Some(session.id().to_string()),
                                sequence: Some(session.sequence()),
                            })
                            .unwrap_or_default();
                        ctx.send(WorkerMessage::FetchSessionData(details));
                    }
                }
            }

            item = shard.next_event(EventTypeFlags::all()) => {
                let event = match item {
                    None => {
                        info!(shard_id = id, "Shard event stream ended");
                        ctx.set_status(ShardStatus::Disconnected);
                        return Ok(());
                    }
                    Some(Ok(event)) => event,
                    Some(Err(source)) => {
                        if matches!(source.kind(), ReceiveMessageErrorType::Reconnect) {
                            ctx.set_status(ShardStatus::Disconnected);
                            return Err(WorkerError::Gateway(source.to_string()));
                        }

                        warn!(shard_id = id, error = %source, "Error receiving event");
                        ctx.debug(format!("Error receiving event: {source}"));
                        continue;
                    }
                };

                match &event {
                    Event::GatewayHello(_) => {
                        let status = if shard.session().is_some() {
                            ShardStatus::Resuming
                        } else {
                            ShardStatus::Connecting
                        };
                        ctx.set_status(status);
                    }
                    Event::Ready(ready_event) => {
                        ready = true;
                        ctx.debug(format!(
                            "Ready: session {} with {} guilds",
                            ready_event.session_id,
                            ready_event.guilds.len()
                        ));
                        ctx.set_status(ShardStatus::Connected);
                        ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));
                    }
                    Event::Resumed => {
                        ready = true;
                        ctx.set_status(ShardStatus::Connected);
                        ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::Ready));
                    }
                    Event::GatewayInvalidateSession(resumable) => {
                        ready = false;
                        let status = if *resumable {
                            ShardStatus::Resuming
                        } else {
                            ShardStatus::Reconnecting
                        };
                        ctx.set_status(status);
                        ctx.send(WorkerMessage::GatewayStatus(GatewayStatus::InvalidSession));
                    }
                    Event::GatewayReconnect => {
                        ready = false;
                        ctx.set_status(ShardStatus::Reconnecting);
                    }
                    Event::GatewayHeartbeatAck => {
                        if let Some(average) = shard.latency().average() {
                            ctx.send(WorkerMessage::UpdatePing(average.as_millis() as i64));
                        }
                    }
                    Event::GatewayClose(frame) => {
                        ready = false;
                        ctx.set_status(ShardStatus::Disconnected);

                        if closing {
                            return Ok(());
                        }

                        if let Some(frame) = frame {
                            let close = CloseInfo::new(frame.code, frame.reason.to_string());
                            if !close.can_reconnect() {
                                warn!(shard_id = id, code = close.code, reason = %close.reason, "Gateway refused connection");
                                ctx.send(WorkerMessage::CannotReconnect(close));
                                return Ok(());
                            }
                            ctx.debug(format!("Connection closed with code {}, reconnecting", close.code));
                        }
                    }
                    _ => {}
                }

                if let Some(payload) = dispatch_payload(&event) {
                    ctx.send(WorkerMessage::Dispatch(payload));
                }
            }
        }
    }
}
