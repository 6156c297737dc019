//! Gateway configuration module
//!
//! Handles loading configuration from environment variables.

use crate::error::GatewayError;
use crate::shard::{ManagerOptions, DEFAULT_GATEWAY_VERSION};
use serde_json::{Map, Value};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use twilight_gateway::Intents;

/// Default gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Pool ID for this gateway instance (0-indexed)
    /// Each pool manages SHARDS_PER_POOL shards
    pub pool_id: u32,

    /// Total number of shards across all pools
    pub total_shards: u32,

    /// Base gateway endpoint handed to every worker
    pub gateway_url: String,

    /// Gateway protocol version
    pub gateway_version: u8,

    /// Gateway intents
    pub intents: Intents,

    /// Member count above which a guild is considered large
    pub large_threshold: Option<u64>,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Delay before an exited shard is restarted
    pub restart_delay: Duration,

    /// Minimum spacing between identify attempts across the pool
    pub identify_interval: Duration,
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .or_else(|| lookup("DISCORD_BOT_TOKEN"))
            .ok_or_else(|| {
                GatewayError::Config("DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set".to_string())
            })?;

        let pool_id = parse_or(&lookup, "POOL_ID", 0u32)?;

        // Twilight takes u32 shard ids
        let total_shards: u64 = parse_or(&lookup, "TOTAL_SHARDS", 1)?;
        let total_shards = u32::try_from(total_shards)
            .map_err(|_| GatewayError::ShardIdOverflow { value: total_shards })?;
        if total_shards == 0 {
            return Err(GatewayError::Config("TOTAL_SHARDS must be at least 1".to_string()));
        }

        let gateway_url = lookup("GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        let gateway_version = parse_or(&lookup, "GATEWAY_VERSION", DEFAULT_GATEWAY_VERSION)?;

        let intents = match lookup("INTENTS") {
            Some(raw) => {
                let bits: u64 = raw
                    .parse()
                    .map_err(|e| GatewayError::Config(format!("INTENTS must be a valid number: {e}")))?;
                Intents::from_bits_truncate(bits)
            }
            None => Self::intents(),
        };

        let large_threshold = lookup("LARGE_THRESHOLD")
            .map(|raw| {
                raw.parse().map_err(|e| {
                    GatewayError::Config(format!("LARGE_THRESHOLD must be a valid number: {e}"))
                })
            })
            .transpose()?;

        let http_port = match lookup("HTTP_PORT").or_else(|| lookup("METRICS_PORT")) {
            Some(raw) => raw.parse().map_err(|e| {
                GatewayError::Config(format!("HTTP_PORT must be a valid port number: {e}"))
            })?,
            None => 9090,
        };

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let restart_delay = Duration::from_millis(parse_or(&lookup, "RESTART_DELAY_MS", 5000)?);
        let identify_interval =
            Duration::from_millis(parse_or(&lookup, "IDENTIFY_INTERVAL_MS", 5000)?);

        Ok(Self {
            discord_token,
            pool_id,
            total_shards,
            gateway_url,
            gateway_version,
            intents,
            large_threshold,
            http_port,
            log_level,
            restart_delay,
            identify_interval,
        })
    }

    /// Default Discord intents
    ///
    /// - GUILDS: Required for guild lifecycle events
    /// - GUILD_MEMBERS: Required for member events (privileged)
    pub fn intents() -> Intents {
        Intents::GUILDS | Intents::GUILD_MEMBERS
    }

    /// Options every worker of this process starts with
    pub fn manager_options(&self) -> ManagerOptions {
        let mut additional_options = Map::new();
        if let Some(threshold) = self.large_threshold {
            additional_options.insert("large_threshold".to_string(), Value::from(threshold));
        }

        ManagerOptions {
            gateway_version: self.gateway_version,
            intents: self.intents,
            additional_options,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("discord_token", &"<redacted>")
            .field("pool_id", &self.pool_id)
            .field("total_shards", &self.total_shards)
            .field("gateway_url", &self.gateway_url)
            .field("gateway_version", &self.gateway_version)
            .field("intents", &self.intents)
            .field("large_threshold", &self.large_threshold)
            .field("http_port", &self.http_port)
            .field("log_level", &self.log_level)
            .field("restart_delay", &self.restart_delay)
            .field("identify_interval", &self.identify_interval)
            .finish()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, GatewayError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| GatewayError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}
