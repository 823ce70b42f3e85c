//! [`RedisStreamBackend`]: the durable counterpart to
//! `spice_eventbus::inmemory::InMemoryBackend`. Each channel is a Redis
//! stream (`XADD`/`XREADGROUP`/`XACK`) with a shared consumer group; a
//! background reader loop fans entries out to local subscribers over the
//! same `tokio::sync::broadcast` mechanism the in-memory backend uses, a
//! trim task keeps the stream bounded, and a recovery task reclaims entries
//! a crashed consumer left pending.

use crate::config::RedisStreamConfig;
use crate::error::{Result, StreamBackendError};
use crate::wire;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::streams::{StreamClaimReply, StreamReadReply};
use spice_eventbus::backend::{BackendSubscription, StreamBackend};
use spice_eventbus::envelope::EventEnvelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const OVERFLOW_SUFFIX: &str = ":deadletter";

/// Background tasks kept alive for one channel, plus the capacity it was
/// created with (also the `XTRIM ~ MAXLEN` target).
struct ChannelWorkers {
    reader: JoinHandle<()>,
    recovery: JoinHandle<()>,
    trim: JoinHandle<()>,
}

/// Redis Streams implementation of [`StreamBackend`].
///
/// `consumer_id` is derived once at construction (`{consumerPrefix}-{uuid}`)
/// and held for the backend's lifetime — stability across process restarts
/// within the same deployment is what lets [`Self::recovery_loop`] reclaim a
/// prior instance's pending entries rather than just its own.
pub struct RedisStreamBackend {
    config: Arc<RedisStreamConfig>,
    pool: Pool,
    consumer_id: String,
    topics: RwLock<HashMap<String, broadcast::Sender<EventEnvelope>>>,
    workers: tokio::sync::Mutex<HashMap<String, ChannelWorkers>>,
    shutdown: Arc<AtomicBool>,
}

impl RedisStreamBackend {
    /// Builds the connection pool eagerly; does not touch Redis itself until
    /// the first `ensure_channel`/`publish`/`subscribe` call.
    pub fn new(config: RedisStreamConfig) -> Result<Self> {
        let pool = PoolConfig::from_url(config.redis_url())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StreamBackendError::PoolConfig(e.to_string()))?;
        let consumer_id = format!("{}-{}", config.consumer_prefix, uuid::Uuid::new_v4());

        Ok(Self {
            config: Arc::new(config),
            pool,
            consumer_id,
            topics: RwLock::new(HashMap::new()),
            workers: tokio::sync::Mutex::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(StreamBackendError::from)
    }

    fn topic_sender(&self, channel: &str, capacity: usize) -> broadcast::Sender<EventEnvelope> {
        if let Some(topic) = self.topics.read().expect("redis backend topic lock poisoned").get(channel) {
            return topic.clone();
        }
        let mut topics = self.topics.write().expect("redis backend topic lock poisoned");
        topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(capacity.max(1)).0)
            .clone()
    }

    /// Idempotently creates the channel's consumer group (`MKSTREAM` so the
    /// stream itself springs into existence too) and spawns its three
    /// background workers, unless they are already running.
    async fn ensure_workers(&self, channel: &str, capacity: usize) -> Result<()> {
        let stream_key = self.config.stream_key(channel);
        let group = self.config.consumer_group_name(channel);

        let mut conn = self.connection().await?;
        let created: Result<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream_key)
            .arg(&group)
            .arg(&self.config.start_position)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await
            .or_else(|e: redis::RedisError| {
                // BUSYGROUP means another process (or an earlier call) already
                // created this group — that's the idempotent success case.
                if e.to_string().contains("BUSYGROUP") {
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .map_err(StreamBackendError::from);
        created?;

        let mut workers = self.workers.lock().await;
        if workers.contains_key(channel) {
            return Ok(());
        }

        let sender = self.topic_sender(channel, capacity);
        let reader = tokio::spawn(Self::reader_loop(
            self.pool.clone(),
            self.config.clone(),
            channel.to_string(),
            stream_key.clone(),
            group.clone(),
            self.consumer_id.clone(),
            sender.clone(),
            self.shutdown.clone(),
        ));
        let recovery = tokio::spawn(Self::recovery_loop(
            self.pool.clone(),
            self.config.clone(),
            channel.to_string(),
            stream_key.clone(),
            group.clone(),
            self.consumer_id.clone(),
            sender,
            self.shutdown.clone(),
        ));
        let trim = tokio::spawn(Self::trim_loop(
            self.pool.clone(),
            self.config.clone(),
            stream_key,
            capacity,
            self.shutdown.clone(),
        ));

        workers.insert(channel.to_string(), ChannelWorkers { reader, recovery, trim });
        Ok(())
    }

    /// Long-polls up to `batchSize` new entries at a time, fans each one out
    /// to the local topic, then ACKs it. Late subscribers only ever see
    /// entries published after they subscribe to the topic — catching up on
    /// stream history is the recovery/claim path's job, not this loop's.
    async fn reader_loop(
        pool: Pool,
        config: Arc<RedisStreamConfig>,
        channel: String,
        stream_key: String,
        group: String,
        consumer_id: String,
        sender: broadcast::Sender<EventEnvelope>,
        shutdown: Arc<AtomicBool>,
    ) {
        while !shutdown.load(Ordering::Relaxed) {
            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "redis stream reader: pool checkout failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    continue;
                }
            };

            let reply: redis::RedisResult<StreamReadReply> = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&group)
                .arg(&consumer_id)
                .arg("COUNT")
                .arg(config.batch_size)
                .arg("BLOCK")
                .arg(config.poll_timeout_ms)
                .arg("STREAMS")
                .arg(&stream_key)
                .arg(">")
                .query_async(&mut conn)
                .await;

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "redis stream reader: XREADGROUP failed");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    continue;
                }
            };

            for key in reply.keys {
                for entry in key.ids {
                    match wire::decode(&channel, &entry) {
                        Ok(envelope) => {
                            let _ = sender.send(envelope);
                        }
                        Err(e) => tracing::warn!(%channel, error = %e, "dropping malformed stream entry"),
                    }
                    if let Err(e) = redis::cmd("XACK")
                        .arg(&stream_key)
                        .arg(&group)
                        .arg(&entry.id)
                        .query_async::<_, i64>(&mut conn)
                        .await
                    {
                        tracing::warn!(%channel, id = %entry.id, error = %e, "XACK failed");
                    }
                }
            }
        }
    }

    /// Scans for entries idle longer than `pendingIdleTimeMs`. Entries
    /// within `maxPendingRetries` are reclaimed to this consumer and
    /// re-delivered; entries beyond it are republished to an overflow
    /// stream (`{streamKey}:deadletter`) and acknowledged so they stop
    /// haunting `XPENDING`. This is the implementation of the
    /// pending/claim recovery requirement — without it a crashed consumer's
    /// in-flight entries would be lost silently forever.
    async fn recovery_loop(
        pool: Pool,
        config: Arc<RedisStreamConfig>,
        channel: String,
        stream_key: String,
        group: String,
        consumer_id: String,
        sender: broadcast::Sender<EventEnvelope>,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut ticker = tokio::time::interval(config.recovery_interval());
        ticker.tick().await; // first tick fires immediately; skip it

        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "recovery task: pool checkout failed");
                    continue;
                }
            };

            let pending: redis::RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
                .arg(&stream_key)
                .arg(&group)
                .arg("IDLE")
                .arg(config.pending_idle_time_ms)
                .arg("-")
                .arg("+")
                .arg(config.batch_size)
                .query_async(&mut conn)
                .await;

            let pending = match pending {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "XPENDING failed");
                    continue;
                }
            };

            for (entry_id, _owner, _idle_ms, delivery_count) in pending {
                if delivery_count as u32 > config.max_pending_retries {
                    tracing::warn!(
                        %channel, id = %entry_id, delivery_count,
                        "pending entry exceeded maxPendingRetries, routing to overflow stream"
                    );
                    if let Err(e) =
                        Self::dead_letter_pending_entry(&mut conn, &channel, &stream_key, &group, &entry_id).await
                    {
                        tracing::warn!(%channel, id = %entry_id, error = %e, "failed to dead-letter pending entry");
                    }
                    continue;
                }

                let claimed: redis::RedisResult<StreamClaimReply> = redis::cmd("XCLAIM")
                    .arg(&stream_key)
                    .arg(&group)
                    .arg(&consumer_id)
                    .arg(config.pending_idle_time_ms)
                    .arg(&entry_id)
                    .query_async(&mut conn)
                    .await;

                let claimed = match claimed {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        tracing::warn!(%channel, id = %entry_id, error = %e, "XCLAIM failed");
                        continue;
                    }
                };

                for entry in claimed.ids {
                    match wire::decode(&channel, &entry) {
                        Ok(envelope) => {
                            tracing::info!(%channel, id = %entry.id, "reclaimed pending entry redelivered");
                            let _ = sender.send(envelope);
                        }
                        Err(e) => tracing::warn!(%channel, error = %e, "dropping malformed reclaimed entry"),
                    }
                    if let Err(e) = redis::cmd("XACK")
                        .arg(&stream_key)
                        .arg(&group)
                        .arg(&entry.id)
                        .query_async::<_, i64>(&mut conn)
                        .await
                    {
                        tracing::warn!(%channel, id = %entry.id, error = %e, "XACK of reclaimed entry failed");
                    }
                }
            }
        }
    }

    /// Copies one unreclaimable pending entry's raw fields into
    /// `{streamKey}:deadletter` and ACKs the original so `XPENDING` stops
    /// reporting it.
    async fn dead_letter_pending_entry(
        conn: &mut deadpool_redis::Connection,
        channel: &str,
        stream_key: &str,
        group: &str,
        entry_id: &str,
    ) -> Result<()> {
        let range: Vec<redis::streams::StreamId> = redis::cmd("XRANGE")
            .arg(stream_key)
            .arg(entry_id)
            .arg(entry_id)
            .query_async(conn)
            .await
            .map_err(StreamBackendError::from)?;

        if let Some(entry) = range.first() {
            if let Ok(envelope) = wire::decode(channel, entry) {
                let overflow_key = format!("{stream_key}{OVERFLOW_SUFFIX}");
                let fields = wire::encode(&envelope)?;
                let mut cmd = redis::cmd("XADD");
                cmd.arg(&overflow_key).arg("*");
                for (key, value) in fields {
                    cmd.arg(key).arg(value);
                }
                cmd.query_async::<_, String>(conn).await.map_err(StreamBackendError::from)?;
            }
        }

        redis::cmd("XACK")
            .arg(stream_key)
            .arg(group)
            .arg(entry_id)
            .query_async::<_, i64>(conn)
            .await
            .map_err(StreamBackendError::from)?;
        Ok(())
    }

    /// `XTRIM ~ MAXLEN capacity` on an interval — approximate trimming, so it
    /// never blocks the stream on an exact count scan.
    async fn trim_loop(pool: Pool, config: Arc<RedisStreamConfig>, stream_key: String, capacity: usize, shutdown: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(config.trim_interval());
        ticker.tick().await;

        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(%stream_key, error = %e, "trim task: pool checkout failed");
                    continue;
                }
            };
            if let Err(e) = redis::cmd("XTRIM")
                .arg(&stream_key)
                .arg("MAXLEN")
                .arg("~")
                .arg(capacity as i64)
                .query_async::<_, i64>(&mut conn)
                .await
            {
                tracing::warn!(%stream_key, error = %e, "XTRIM failed");
            }
        }
    }
}

#[async_trait]
impl StreamBackend for RedisStreamBackend {
    async fn publish(&self, channel: &str, envelope: EventEnvelope) -> spice_eventbus::error::Result<String> {
        let stream_key = self.config.stream_key(channel);
        let fields = wire::encode(&envelope)?;
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream_key).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await.map_err(StreamBackendError::from)?;
        Ok(id)
    }

    async fn subscribe(&self, channel: &str) -> spice_eventbus::error::Result<BackendSubscription> {
        self.ensure_workers(channel, self.default_capacity()).await?;
        let sender = self.topic_sender(channel, self.default_capacity());
        Ok(BackendSubscription::new(sender.subscribe()))
    }

    async fn ensure_channel(&self, channel: &str, capacity: usize) -> spice_eventbus::error::Result<()> {
        self.ensure_workers(channel, capacity).await?;
        Ok(())
    }

    async fn close(&self) -> spice_eventbus::error::Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        let mut workers = self.workers.lock().await;
        for (_, handles) in workers.drain() {
            handles.reader.abort();
            handles.recovery.abort();
            handles.trim.abort();
        }
        self.topics.write().expect("redis backend topic lock poisoned").clear();
        Ok(())
    }
}

impl RedisStreamBackend {
    fn default_capacity(&self) -> usize {
        1000
    }
}
