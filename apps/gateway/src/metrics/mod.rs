//! Prometheus metrics module
//!
//! Recording goes through the `metrics` facade, so supervisors record
//! whether or not a recorder is installed. The binary installs the
//! Prometheus recorder once through [`GatewayMetrics::install`].

use crate::error::GatewayError;
use crate::shard::ShardStatus;
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Prometheus exporter handle
#[derive(Clone)]
pub struct GatewayMetrics {
    handle: Arc<PrometheusHandle>,
}

impl GatewayMetrics {
    /// Install the global recorder and register metric descriptions
    pub fn install() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::Config(format!("failed to install Prometheus recorder: {e}")))?;

        Self::register_metrics();

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "shard_worker_spawns_total",
            Unit::Count,
            "Connection workers spawned"
        );
        describe_counter!(
            "shard_worker_exits_total",
            Unit::Count,
            "Connection worker exits"
        );
        describe_counter!(
            "shard_worker_errors_total",
            Unit::Count,
            "Errors reported by live connection workers"
        );
        describe_counter!(
            "shard_restart_requests_total",
            Unit::Count,
            "Restart requests sent to the orchestrator"
        );
        describe_counter!(
            "shard_identify_requests_total",
            Unit::Count,
            "Identify slot requests sent to the orchestrator"
        );
        describe_counter!(
            "shard_dispatch_events_total",
            Unit::Count,
            "Decoded gateway events forwarded by the shard"
        );
        describe_counter!(
            "shard_connect_failures_total",
            Unit::Count,
            "Failed connect attempts"
        );
        describe_gauge!(
            "shard_ping_milliseconds",
            Unit::Milliseconds,
            "Last heartbeat round trip"
        );
        describe_gauge!(
            "shard_status",
            Unit::Count,
            "Connection status (0=disconnected 1=connecting 2=connected 3=resuming 4=reconnecting)"
        );
        describe_gauge!(
            "gateway_shards_connected",
            Unit::Count,
            "Shards in the connected state"
        );
    }

    /// Set connected shard count for a pool
    pub fn set_shards_connected(&self, pool_id: u32, count: usize) {
        gauge!(
            "gateway_shards_connected",
            "pool_id" => pool_id.to_string()
        )
        .set(count as f64);
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

pub fn record_worker_spawn(shard_id: u32) {
    counter!("shard_worker_spawns_total", "shard_id" => shard_id.to_string()).increment(1);
}

pub fn record_worker_exit(shard_id: u32, exit_code: i32) {
    counter!(
        "shard_worker_exits_total",
        "shard_id" => shard_id.to_string(),
        "exit_code" => exit_code.to_string()
    )
    .increment(1);
}

pub fn record_worker_error(shard_id: u32) {
    counter!("shard_worker_errors_total", "shard_id" => shard_id.to_string()).increment(1);
}

pub fn record_restart_request(shard_id: u32) {
    counter!("shard_restart_requests_total", "shard_id" => shard_id.to_string()).increment(1);
}

pub fn record_identify_request(shard_id: u32) {
    counter!("shard_identify_requests_total", "shard_id" => shard_id.to_string()).increment(1);
}

pub fn record_dispatch(shard_id: u32, event: &str) {
    counter!(
        "shard_dispatch_events_total",
        "shard_id" => shard_id.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

pub fn record_connect_failure(shard_id: u32, error: &GatewayError) {
    counter!(
        "shard_connect_failures_total",
        "shard_id" => shard_id.to_string(),
        "error_type" => error.error_type_label()
    )
    .increment(1);
}

pub fn set_ping(shard_id: u32, ping: i64) {
    gauge!("shard_ping_milliseconds", "shard_id" => shard_id.to_string()).set(ping as f64);
}

pub fn set_status(shard_id: u32, status: ShardStatus) {
    gauge!("shard_status", "shard_id" => shard_id.to_string()).set(status.gauge_value());
}
