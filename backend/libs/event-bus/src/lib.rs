//! RabbitMQ event bus shared by the Pulse services.
//!
//! One `EventBus` per process owns a single connection and channel. Producers
//! publish JSON payloads to a topic exchange keyed by routing key; consumers
//! bind exclusive auto-delete queues and process deliveries with manual acks.
//!
//! ```text
//! content-service:
//!   1. Commit post row to Postgres
//!   2. bus.publish("post.created", &event)        (fire-and-forget)
//!          ↓
//! topic exchange (non-durable, pattern-matched routing keys)
//!          ↓ fan-out per binding
//! search-service / media-service:
//!   3. Exclusive queue delivers the message
//!   4. Handler applies an idempotent update to the derived store
//!   5. Ack on success; bounded retry then dead-letter on failure
//! ```
//!
//! Delivery is at-least-once: a crash between handler completion and ack
//! redelivers the message, so handlers must be idempotent. Publishing has no
//! durable outbox; a publish failure drops the event and is only logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

mod error;
pub mod metrics;

pub use error::{EventBusError, Result};

/// Header carrying the delivery attempt number across republishes.
const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header preserving the original routing key on dead-lettered payloads.
const ORIGINAL_ROUTING_KEY_HEADER: &str = "x-original-routing-key";

/// Upper bound for the reconnect backoff between attempts.
const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    /// AMQP connection string.
    pub url: String,
    /// Topic exchange name. Declared non-durable: derived stores must be
    /// rebuildable from the canonical store after a broker restart.
    pub exchange: String,
    /// Per-consumer prefetch; bounds in-flight deliveries while handlers run
    /// slow external calls.
    pub prefetch: u16,
    /// Upper bound on broker I/O for a single publish call.
    pub publish_timeout: Duration,
    /// Connection attempts before `connect` gives up (fatal at startup).
    pub connect_retries: u32,
    /// Initial reconnect backoff; doubles per attempt up to 30s.
    pub connect_backoff: Duration,
    /// Deliveries attempted per message before it is dead-lettered.
    pub max_delivery_attempts: u32,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            url: "amqp://127.0.0.1:5672/%2f".to_string(),
            exchange: "pulse.events".to_string(),
            prefetch: 32,
            publish_timeout: Duration::from_secs(2),
            connect_retries: 5,
            connect_backoff: Duration::from_millis(500),
            max_delivery_attempts: 3,
        }
    }
}

impl EventBusConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("RABBITMQ_URL").unwrap_or(defaults.url),
            exchange: std::env::var("EVENT_BUS_EXCHANGE").unwrap_or(defaults.exchange),
            prefetch: env_parse("EVENT_BUS_PREFETCH", defaults.prefetch),
            publish_timeout: Duration::from_millis(env_parse(
                "EVENT_BUS_PUBLISH_TIMEOUT_MS",
                defaults.publish_timeout.as_millis() as u64,
            )),
            connect_retries: env_parse("EVENT_BUS_CONNECT_RETRIES", defaults.connect_retries),
            connect_backoff: Duration::from_millis(env_parse(
                "EVENT_BUS_CONNECT_BACKOFF_MS",
                defaults.connect_backoff.as_millis() as u64,
            )),
            max_delivery_attempts: env_parse(
                "EVENT_BUS_MAX_DELIVERY_ATTEMPTS",
                defaults.max_delivery_attempts,
            ),
        }
    }

    /// Name of the dead-letter queue for this exchange.
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dead-letter", self.exchange)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

struct BusState {
    connection: Connection,
    channel: Channel,
}

/// Process-wide RabbitMQ client.
///
/// Cheap to clone; all clones share one connection and one channel guarded by
/// a mutex, so channel access is serialized across publishers and consumers.
#[derive(Clone)]
pub struct EventBus {
    config: Arc<EventBusConfig>,
    state: Arc<Mutex<Option<BusState>>>,
}

impl EventBus {
    /// Connect to the broker and declare the topic exchange.
    ///
    /// Retries with exponential backoff up to `connect_retries` attempts and
    /// returns the last error once exhausted. Services treat that as fatal at
    /// startup rather than running without their event subsystem.
    pub async fn connect(config: EventBusConfig) -> Result<Self> {
        let bus = Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(None)),
        };

        let state = bus.establish().await?;
        *bus.state.lock().await = Some(state);
        Ok(bus)
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    async fn establish(&self) -> Result<BusState> {
        let mut backoff = self.config.connect_backoff;
        let mut attempt = 1u32;

        loop {
            match self.try_connect().await {
                Ok(state) => return Ok(state),
                Err(err) => {
                    if attempt >= self.config.connect_retries {
                        error!(
                            attempts = attempt,
                            error = %err,
                            "giving up on broker connection"
                        );
                        return Err(err);
                    }
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "broker connection failed, retrying"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_CONNECT_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<BusState> {
        let connection =
            Connection::connect(&self.config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(exchange = %self.config.exchange, "connected to RabbitMQ");
        Ok(BusState {
            connection,
            channel,
        })
    }

    /// Publish a JSON event under the given routing key.
    ///
    /// Fire-and-forget: no broker confirm is awaited, and a routing key with
    /// zero bound queues is still success. Broker I/O is bounded by the
    /// publish timeout; on error or timeout the event is dropped and the
    /// error returned for the caller to log.
    pub async fn publish<E: Serialize>(&self, routing_key: &str, event: &E) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let properties = BasicProperties::default().with_content_type("application/json".into());

        let result = tokio::time::timeout(
            self.config.publish_timeout,
            self.publish_raw(&self.config.exchange, routing_key, &payload, properties),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                metrics::EVENTS_PUBLISHED_TOTAL
                    .with_label_values(&[routing_key, "success"])
                    .inc();
                debug!(routing_key, bytes = payload.len(), "event published");
                Ok(())
            }
            Ok(Err(err)) => {
                metrics::EVENTS_PUBLISHED_TOTAL
                    .with_label_values(&[routing_key, "error"])
                    .inc();
                Err(err)
            }
            Err(_) => {
                metrics::EVENTS_PUBLISHED_TOTAL
                    .with_label_values(&[routing_key, "timeout"])
                    .inc();
                Err(EventBusError::PublishTimeout(self.config.publish_timeout))
            }
        }
    }

    /// Serialized publish over the shared channel, re-establishing the
    /// connection first if it was lost.
    async fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        self.ensure_state(&mut guard).await?;
        let channel = &guard.as_ref().expect("state present after ensure").channel;

        let publish = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await;

        if let Err(err) = publish {
            // Drop the state so the next call reconnects.
            *guard = None;
            return Err(err.into());
        }
        Ok(())
    }

    /// Lazily (re)establish the connection under the state lock.
    async fn ensure_state(&self, guard: &mut Option<BusState>) -> Result<()> {
        if let Some(state) = guard.as_ref() {
            if state.connection.status().connected() {
                return Ok(());
            }
            warn!("broker connection lost, re-establishing");
            *guard = None;
        }
        *guard = Some(self.establish().await?);
        Ok(())
    }

    /// Bind an exclusive queue to `routing_key` and consume it on a spawned
    /// listener task until the returned [`Subscription`] is shut down.
    ///
    /// Each delivery is deserialized and passed to `handler`; the message is
    /// acked only when the handler returns `Ok`. Failures are retried by
    /// republishing with an attempt header, then dead-lettered once the
    /// budget is exhausted. Malformed payloads are logged and dropped.
    pub async fn subscribe<E, F, Fut>(&self, routing_key: &str, handler: F) -> Result<Subscription>
    where
        E: DeserializeOwned + Send + 'static,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (queue, consumer) = self.bind_consumer(routing_key).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bus = self.clone();
        let key = routing_key.to_string();
        let handle = tokio::spawn(async move {
            bus.consume_loop(key, queue, consumer, handler, shutdown_rx)
                .await;
        });

        Ok(Subscription {
            routing_key: routing_key.to_string(),
            shutdown_tx,
            handle,
        })
    }

    async fn bind_consumer(&self, routing_key: &str) -> Result<(String, Consumer)> {
        let mut guard = self.state.lock().await;
        self.ensure_state(&mut guard).await?;
        let channel = &guard.as_ref().expect("state present after ensure").channel;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        // Anonymous exclusive queue, removed by the broker on disconnect.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue_name = queue.name().as_str().to_string();

        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        // Terminal destination for deliveries that exhaust the retry budget.
        channel
            .queue_declare(
                &self.config.dead_letter_queue(),
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(routing_key, queue = %queue_name, "subscribed to events");
        Ok((queue_name, consumer))
    }

    async fn consume_loop<E, F, Fut>(
        self,
        routing_key: String,
        mut queue: String,
        mut consumer: Consumer,
        handler: F,
        mut shutdown: watch::Receiver<bool>,
    ) where
        E: DeserializeOwned + Send + 'static,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(routing_key, "shutdown signal received, stopping listener");
                        break;
                    }
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            self.handle_delivery(&routing_key, &queue, delivery, &handler)
                                .await;
                        }
                        Some(Err(err)) => {
                            error!(routing_key, error = %err, "delivery error");
                        }
                        None => {
                            if *shutdown.borrow() {
                                break;
                            }
                            warn!(routing_key, "delivery stream closed, resubscribing");
                            match self.resubscribe(&routing_key, &mut shutdown).await {
                                Some((new_queue, new_consumer)) => {
                                    queue = new_queue;
                                    consumer = new_consumer;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
        }
    }

    /// Re-bind the consumer after the connection dropped mid-run. Backs off
    /// between attempts; returns `None` when shut down while waiting.
    async fn resubscribe(
        &self,
        routing_key: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<(String, Consumer)> {
        let mut backoff = self.config.connect_backoff;
        loop {
            match self.bind_consumer(routing_key).await {
                Ok(bound) => return Some(bound),
                Err(err) => {
                    warn!(
                        routing_key,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "resubscribe failed, retrying"
                    );
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
                _ = sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_CONNECT_BACKOFF);
        }
    }

    async fn handle_delivery<E, F, Fut>(
        &self,
        routing_key: &str,
        queue: &str,
        delivery: Delivery,
        handler: &F,
    ) where
        E: DeserializeOwned,
        F: Fn(E) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let event: E = match serde_json::from_slice(&delivery.data) {
            Ok(event) => event,
            Err(err) => {
                warn!(routing_key, error = %err, "malformed event payload, dropping");
                metrics::EVENTS_CONSUMED_TOTAL
                    .with_label_values(&[routing_key, "malformed"])
                    .inc();
                if let Err(err) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(routing_key, error = %err, "failed to reject malformed delivery");
                }
                return;
            }
        };

        match handler(event).await {
            Ok(()) => {
                metrics::EVENTS_CONSUMED_TOTAL
                    .with_label_values(&[routing_key, "success"])
                    .inc();
                if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                    // Redelivery will occur; the handler must be idempotent.
                    warn!(routing_key, error = %err, "failed to ack delivery");
                }
            }
            Err(err) => {
                let attempt = delivery_attempt(&delivery.properties);
                if !budget_exhausted(attempt, self.config.max_delivery_attempts) {
                    warn!(
                        routing_key,
                        attempt,
                        max_attempts = self.config.max_delivery_attempts,
                        error = %err,
                        "handler failed, requeueing"
                    );
                    metrics::EVENTS_CONSUMED_TOTAL
                        .with_label_values(&[routing_key, "retried"])
                        .inc();
                    self.requeue(routing_key, queue, delivery, attempt + 1).await;
                } else {
                    error!(
                        routing_key,
                        attempt,
                        error = %err,
                        "handler retry budget exhausted, dead-lettering"
                    );
                    metrics::EVENTS_CONSUMED_TOTAL
                        .with_label_values(&[routing_key, "failed"])
                        .inc();
                    self.dead_letter(routing_key, delivery).await;
                }
            }
        }
    }

    /// Republish the payload to the consumer's own queue with an incremented
    /// attempt header, then ack the failed delivery away from the queue.
    async fn requeue(&self, routing_key: &str, queue: &str, delivery: Delivery, attempt: u32) {
        let republished = self
            .publish_raw(
                "",
                queue,
                &delivery.data,
                retry_properties(routing_key, attempt),
            )
            .await;

        match republished {
            Ok(()) => {
                if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(routing_key, error = %err, "failed to ack retried delivery");
                }
            }
            Err(err) => {
                // Fall back to a broker-side requeue; the attempt header is
                // unchanged so the budget is not consumed by this path.
                warn!(routing_key, error = %err, "retry republish failed, nacking with requeue");
                if let Err(err) = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                {
                    error!(routing_key, error = %err, "failed to nack delivery");
                }
            }
        }
    }

    /// Route a poisoned payload to the dead-letter queue and ack it away
    /// from the retry path.
    async fn dead_letter(&self, routing_key: &str, delivery: Delivery) {
        let attempt = delivery_attempt(&delivery.properties);
        let result = self
            .publish_raw(
                "",
                &self.config.dead_letter_queue(),
                &delivery.data,
                retry_properties(routing_key, attempt),
            )
            .await;

        match result {
            Ok(()) => {
                metrics::EVENTS_DEAD_LETTERED_TOTAL
                    .with_label_values(&[routing_key])
                    .inc();
                if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(routing_key, error = %err, "failed to ack dead-lettered delivery");
                }
            }
            Err(err) => {
                error!(routing_key, error = %err, "failed to dead-letter delivery, dropping");
                if let Err(err) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(routing_key, error = %err, "failed to nack poisoned delivery");
                }
            }
        }
    }

    /// Close the underlying connection. Call after draining subscriptions.
    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.take() {
            if let Err(err) = state.connection.close(0, "shutdown").await {
                warn!(error = %err, "error closing broker connection");
            }
        }
    }
}

/// Handle to a spawned listener task. Dropping it stops the listener; prefer
/// [`Subscription::shutdown`] to let the in-flight handler finish first.
pub struct Subscription {
    routing_key: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Cooperative shutdown: signal the listener and wait up to
    /// `drain_timeout` for the in-flight handler to finish. The listener
    /// never acks a delivery whose side effect did not complete.
    pub async fn shutdown(mut self, drain_timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(drain_timeout, &mut self.handle).await {
            Ok(_) => info!(routing_key = %self.routing_key, "listener stopped"),
            Err(_) => {
                warn!(
                    routing_key = %self.routing_key,
                    "listener did not drain within timeout, aborting"
                );
                self.handle.abort();
            }
        }
    }
}

/// A delivery at `attempt` with no attempts left is dead-lettered instead of
/// retried.
fn budget_exhausted(attempt: u32, max_delivery_attempts: u32) -> bool {
    attempt >= max_delivery_attempts
}

/// Attempt number of this delivery, starting at 1 for the first delivery.
fn delivery_attempt(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&ShortString::from(RETRY_COUNT_HEADER)))
        .and_then(|value| match value {
            AMQPValue::LongInt(v) => Some(*v as u32),
            AMQPValue::LongLongInt(v) => Some(*v as u32),
            AMQPValue::ShortShortInt(v) => Some(*v as u32),
            AMQPValue::ShortInt(v) => Some(*v as u32),
            _ => None,
        })
        .unwrap_or(1)
}

/// Properties for a retried or dead-lettered payload: attempt counter plus
/// the original routing key for operator triage.
fn retry_properties(routing_key: &str, attempt: u32) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(attempt as i32));
    headers.insert(
        ORIGINAL_ROUTING_KEY_HEADER.into(),
        AMQPValue::LongString(routing_key.to_string().into()),
    );
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_headers(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delivery_is_attempt_one() {
        assert_eq!(delivery_attempt(&BasicProperties::default()), 1);
    }

    #[test]
    fn test_attempt_header_round_trip() {
        let properties = retry_properties("post.created", 2);
        assert_eq!(delivery_attempt(&properties), 2);
    }

    #[test]
    fn test_retry_properties_preserve_routing_key() {
        let properties = retry_properties("post.deleted", 3);
        let headers = properties.headers().as_ref().expect("headers");
        match headers.inner().get(&ShortString::from(ORIGINAL_ROUTING_KEY_HEADER)) {
            Some(AMQPValue::LongString(key)) => {
                assert_eq!(key.as_bytes(), b"post.deleted");
            }
            other => panic!("unexpected header value: {:?}", other),
        }
    }

    #[test]
    fn test_retry_budget_boundaries() {
        // Attempts below the budget are retried, the final one dead-letters.
        assert!(!budget_exhausted(1, 3));
        assert!(!budget_exhausted(2, 3));
        assert!(budget_exhausted(3, 3));
        assert!(budget_exhausted(4, 3));
    }

    #[test]
    fn test_dead_letter_queue_name_follows_exchange() {
        let config = EventBusConfig {
            exchange: "pulse.events".to_string(),
            ..Default::default()
        };
        assert_eq!(config.dead_letter_queue(), "pulse.events.dead-letter");
    }
}
