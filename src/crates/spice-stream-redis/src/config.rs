//! Configuration for [`crate::backend::RedisStreamBackend`], loaded the same
//! way the rest of the workspace loads layered config: a `serde`-derived
//! struct with a `Default` impl supplying the defaults named below, typically
//! overridden from a config document or environment variables by the caller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_database() -> i64 {
    0
}

fn default_namespace() -> String {
    "spice".to_string()
}

fn default_consumer_prefix() -> String {
    "spice-consumer".to_string()
}

fn default_consumer_group() -> String {
    "default".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_poll_timeout_ms() -> u64 {
    5_000
}

fn default_pending_idle_time_ms() -> u64 {
    30_000
}

fn default_max_pending_retries() -> u32 {
    5
}

fn default_recovery_interval_ms() -> u64 {
    10_000
}

fn default_trim_interval_ms() -> u64 {
    60_000
}

/// `type=redis` config map, per the external-interfaces section: `host,
/// port, password, ssl, database, streamKey, consumerPrefix, batchSize,
/// pollTimeout` plus the recovery/trim knobs this spec's pending/claim
/// recovery requirement needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisStreamConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default = "default_database")]
    pub database: i64,

    /// Prefix shared by every stream key and consumer group name this
    /// backend creates: `{namespace}:stream:{channelName}`,
    /// `{namespace}:cg:{channelName}:{group}`. Named `streamKey` in the
    /// spec's config map; it is a namespace prefix, not one literal key.
    #[serde(rename = "streamKey", default = "default_namespace")]
    pub namespace: String,

    /// Base used to build this process's stable consumer id
    /// (`{consumerPrefix}-{instance_id}`). Stability across restarts is what
    /// makes pending/claim recovery possible.
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,

    /// Shared consumer group name every subscriber of a given channel joins
    /// (`{namespace}:cg:{channelName}:{group}`).
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Max entries read per `XREADGROUP` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// `BLOCK` timeout (ms) for the reader loop's `XREADGROUP` call.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// An entry pending longer than this, still unacknowledged, is eligible
    /// for reclaim by the recovery task.
    #[serde(default = "default_pending_idle_time_ms")]
    pub pending_idle_time_ms: u64,

    /// After this many reclaim attempts an entry is routed to the DLQ
    /// instead of redelivered again.
    #[serde(default = "default_max_pending_retries")]
    pub max_pending_retries: u32,

    /// How often the pending/claim recovery task scans each channel.
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,

    /// How often the async trim task runs per channel, when a channel was
    /// created with a size cap (`XTRIM ~ MAXLEN`).
    #[serde(default = "default_trim_interval_ms")]
    pub trim_interval_ms: u64,

    /// Position new consumer groups start reading from: `"$"` (latest,
    /// default) or `"0-0"`/`"0"` (from the beginning, used by tests that
    /// need to observe history).
    #[serde(default = "default_start_position")]
    pub start_position: String,
}

fn default_start_position() -> String {
    "$".to_string()
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            ssl: false,
            database: default_database(),
            namespace: default_namespace(),
            consumer_prefix: default_consumer_prefix(),
            consumer_group: default_consumer_group(),
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            pending_idle_time_ms: default_pending_idle_time_ms(),
            max_pending_retries: default_max_pending_retries(),
            recovery_interval_ms: default_recovery_interval_ms(),
            trim_interval_ms: default_trim_interval_ms(),
            start_position: default_start_position(),
        }
    }
}

impl RedisStreamConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_start_position(mut self, start_position: impl Into<String>) -> Self {
        self.start_position = start_position.into();
        self
    }

    /// A `redis://` connection URL built from `host`, `port`, `password`,
    /// `ssl` and `database`, suitable for `redis::Client::open`.
    pub fn redis_url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        match &self.password {
            Some(password) => format!("{scheme}://:{password}@{}:{}/{}", self.host, self.port, self.database),
            None => format!("{scheme}://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn stream_key(&self, channel: &str) -> String {
        format!("{}:stream:{channel}", self.namespace)
    }

    pub fn consumer_group_name(&self, channel: &str) -> String {
        format!("{}:cg:{channel}:{}", self.namespace, self.consumer_group)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn pending_idle_time(&self) -> Duration {
        Duration::from_millis(self.pending_idle_time_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    pub fn trim_interval(&self) -> Duration {
        Duration::from_millis(self.trim_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_expected_keys() {
        let config = RedisStreamConfig::default();
        assert_eq!(config.stream_key("my.events"), "spice:stream:my.events");
        assert_eq!(config.consumer_group_name("my.events"), "spice:cg:my.events:default");
    }

    #[test]
    fn redis_url_includes_password_when_set() {
        let config = RedisStreamConfig::default().with_host("redis.internal").with_port(6380);
        assert_eq!(config.redis_url(), "redis://redis.internal:6380/0");

        let with_password = RedisStreamConfig {
            password: Some("hunter2".to_string()),
            ..RedisStreamConfig::default()
        };
        assert_eq!(with_password.redis_url(), "redis://:hunter2@127.0.0.1:6379/0");
    }

    #[test]
    fn deserializes_from_partial_json_with_defaults() {
        let config: RedisStreamConfig = serde_json::from_value(serde_json::json!({ "host": "cache" })).unwrap();
        assert_eq!(config.host, "cache");
        assert_eq!(config.port, 6379);
        assert_eq!(config.batch_size, 50);
    }
}
