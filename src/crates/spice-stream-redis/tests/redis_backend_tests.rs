//! End-to-end tests against a live Redis instance. Ignored by default — run
//! with `cargo test -- --ignored` once `REDIS_URL` (default
//! `redis://127.0.0.1:6379/0`) points at a reachable server.

use serde::{Deserialize, Serialize};
use spice_eventbus::{ChannelConfig, EventBus, StreamBackend};
use spice_stream_redis::{RedisStreamBackend, RedisStreamConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct OrderPlaced {
    order_id: String,
}

/// Reads `REDIS_HOST`/`REDIS_PORT` (defaulting to a local Redis) rather than
/// parsing a `REDIS_URL`, so this test has no dependency on which URL-parsing
/// helper the installed `redis` version happens to expose.
fn config() -> RedisStreamConfig {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    RedisStreamConfig::default()
        .with_host(host)
        .with_port(port)
        .with_namespace(format!("spice-test-{}", uuid::Uuid::new_v4()))
        .with_start_position("0")
}

#[tokio::test]
#[ignore = "requires a reachable Redis instance"]
async fn publish_and_subscribe_round_trips_through_a_real_stream() {
    let backend = RedisStreamBackend::new(config()).expect("backend should build a pool");
    let bus = EventBus::new(Arc::new(backend));
    bus.registry().register("OrderPlaced", "1.0.0");
    bus.channel(ChannelConfig::new("orders.placed", "OrderPlaced", "1.0.0"))
        .await
        .unwrap();

    let mut sub = bus.subscribe::<OrderPlaced>("orders.placed", None).await.unwrap();
    // Give the reader loop's first XREADGROUP a moment to enter its BLOCK wait.
    tokio::time::sleep(Duration::from_millis(200)).await;

    bus.publish(
        "orders.placed",
        "OrderPlaced",
        "1.0.0",
        &OrderPlaced { order_id: "o1".to_string() },
        HashMap::new(),
    )
    .await
    .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("event should arrive before the timeout")
        .unwrap();
    assert_eq!(received.event.order_id, "o1");

    bus.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a reachable Redis instance"]
async fn two_consumers_in_the_same_group_split_the_stream() {
    let cfg = config();
    let backend_a = RedisStreamBackend::new(cfg.clone()).unwrap();
    let backend_b = RedisStreamBackend::new(cfg).unwrap();

    backend_a.ensure_channel("orders.placed", 100).await.unwrap();
    backend_b.ensure_channel("orders.placed", 100).await.unwrap();

    for i in 0..10 {
        let envelope = spice_eventbus::EventEnvelope::new(
            "orders.placed",
            "OrderPlaced",
            "1.0.0",
            serde_json::json!({ "order_id": format!("o{i}") }),
            HashMap::new(),
        );
        backend_a.publish("orders.placed", envelope).await.unwrap();
    }

    let mut sub_a = backend_a.subscribe("orders.placed").await.unwrap();
    let mut sub_b = backend_b.subscribe("orders.placed").await.unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..10 {
        tokio::select! {
            Some(envelope) = sub_a.recv() => { seen.insert(envelope.id); }
            Some(envelope) = sub_b.recv() => { seen.insert(envelope.id); }
            _ = tokio::time::sleep(Duration::from_secs(5)) => break,
        }
    }
    assert_eq!(seen.len(), 10);
}
