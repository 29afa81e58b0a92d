//! Broker-backed event bus.
//!
//! Publishes envelopes to Redis pub/sub topics and mirrors everything the
//! broker delivers into an in-process broadcast channel that the session hub
//! and presence tracker consume. Fan-out always flows through the broker when
//! one is configured, even for events consumed on the same instance, so
//! delivery reasoning is uniform across single- and multi-instance
//! deployments. Without a broker the bus loops envelopes back locally.

use std::time::Duration;

use deadpool_redis::{Config as RedisPoolConfig, Pool, Runtime};
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;

use super::{EventEnvelope, EventKind};

const PUBLISH_ATTEMPTS: u32 = 3;
const SUBSCRIBE_PATTERNS: &[&str] = &["ws.*", "instance.*"];

pub fn create_redis_pool(config: &BrokerConfig) -> Option<Pool> {
    let url = config.url.as_ref()?;

    let timeout = Duration::from_secs(config.connection_timeout_secs);
    let cfg = RedisPoolConfig::from_url(url);
    let pool = cfg.builder().ok().and_then(|b| {
        b.max_size(config.pool_size)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .ok()
    });

    if pool.is_some() {
        info!(broker_url = %url.split('@').next_back().unwrap_or("***"), "Broker pool created");
    }

    pool
}

#[derive(Clone)]
pub struct EventBus {
    redis: Option<Pool>,
    local: broadcast::Sender<EventEnvelope>,
    instance_id: String,
}

impl EventBus {
    pub fn new(redis: Option<Pool>) -> Self {
        let (local, _) = broadcast::channel(1024);
        Self {
            redis,
            local,
            instance_id: format!("recast-{}", Uuid::new_v4()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn has_broker(&self) -> bool {
        self.redis.is_some()
    }

    /// Subscribes to the instance-local envelope stream fed by the broker
    /// subscriber (or the loopback path when no broker is configured).
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.local.subscribe()
    }

    /// Publishes an envelope on a topic. Broker publishes are retried a
    /// bounded number of times; delivery is at-least-once and consumers
    /// tolerate duplicates.
    pub async fn publish(&self, topic: String, kind: EventKind, payload: serde_json::Value) {
        let envelope = EventEnvelope {
            topic,
            kind,
            payload,
            origin_instance_id: self.instance_id.clone(),
            emitted_at: chrono::Utc::now(),
        };

        if let Some(pool) = &self.redis {
            if self.publish_to_broker(pool, &envelope).await {
                return;
            }
            warn!(
                topic = %envelope.topic,
                kind = %envelope.kind,
                "Broker publish failed after retries; delivering locally"
            );
        }

        // Loopback: subscribers on this instance still observe the event.
        let _ = self.local.send(envelope);
    }

    async fn publish_to_broker(&self, pool: &Pool, envelope: &EventEnvelope) -> bool {
        let encoded = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to encode event envelope");
                return false;
            }
        };

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match pool.get().await {
                Ok(mut conn) => {
                    match conn
                        .publish::<_, _, i64>(&envelope.topic, &encoded)
                        .await
                    {
                        Ok(receivers) => {
                            debug!(
                                topic = %envelope.topic,
                                kind = %envelope.kind,
                                receivers,
                                "Event published"
                            );
                            return true;
                        }
                        Err(e) => {
                            warn!(error = %e, attempt, topic = %envelope.topic, "Broker publish error");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Broker connection error");
                }
            }

            if attempt < PUBLISH_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
        }

        false
    }

    /// Runs the broker subscriber: pattern-subscribes to the `ws.*` and
    /// `instance.*` namespaces and forwards every decoded envelope into the
    /// local broadcast channel. Reconnects with backoff until shutdown.
    pub async fn run_subscriber(&self, broker_url: String, mut shutdown_rx: watch::Receiver<bool>) {
        info!(patterns = ?SUBSCRIBE_PATTERNS, "Event bus subscriber started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.consume(&broker_url, &mut shutdown_rx).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "Broker subscription lost; reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("Event bus subscriber stopped");
    }

    async fn consume(
        &self,
        broker_url: &str,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), redis::RedisError> {
        let client = redis::Client::open(broker_url)?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(SUBSCRIBE_PATTERNS).await?;

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        return Err(redis::RedisError::from((
                            redis::ErrorKind::IoError,
                            "pubsub stream closed",
                        )));
                    };

                    let payload: String = match message.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "Unreadable broker message");
                            continue;
                        }
                    };

                    match serde_json::from_str::<EventEnvelope>(&payload) {
                        Ok(envelope) => {
                            let _ = self.local.send(envelope);
                        }
                        Err(e) => {
                            warn!(error = %e, "Undecodable event envelope");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{workspace_topic, EventKind};
    use serde_json::json;

    #[tokio::test]
    async fn test_loopback_without_broker() {
        let bus = EventBus::new(None);
        let mut rx = bus.subscribe();

        let ws = Uuid::new_v4();
        bus.publish(
            workspace_topic(ws),
            EventKind::TransformationStarted,
            json!({"id": "t1"}),
        )
        .await;

        let envelope = rx.recv().await.expect("Envelope should arrive locally");
        assert_eq!(envelope.kind, EventKind::TransformationStarted);
        assert_eq!(envelope.topic, workspace_topic(ws));
        assert_eq!(envelope.origin_instance_id, bus.instance_id());
    }

    #[tokio::test]
    async fn test_instance_ids_are_unique() {
        let bus1 = EventBus::new(None);
        let bus2 = EventBus::new(None);
        assert_ne!(bus1.instance_id(), bus2.instance_id());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_observe_events() {
        let bus = EventBus::new(None);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(
            workspace_topic(Uuid::new_v4()),
            EventKind::WorkspaceMessage,
            json!({"text": "hi"}),
        )
        .await;

        assert_eq!(rx1.recv().await.unwrap().kind, EventKind::WorkspaceMessage);
        assert_eq!(rx2.recv().await.unwrap().kind, EventKind::WorkspaceMessage);
    }
}
