use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use parley_config::BROKER_RECONNECT_DELAY_SECS;
use parley_error::{AppError, AppResult};

use crate::topology::Topology;

/// How a consumer handler failed, which decides the fate of the delivery.
#[derive(Debug)]
pub enum ConsumeError {
    /// The payload can never be processed; reject without requeue so it
    /// travels to the dead-letter exchange.
    Discard(String),
    /// Transient failure; leave the delivery on the queue for redelivery.
    Requeue(String),
}

/// Consumer callback. Receives the raw delivery body.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<(), ConsumeError>> + Send + Sync>;

struct BrokerState {
    connection: Connection,
    channel: Channel,
}

#[derive(Clone)]
struct ConsumerSpec {
    queue: String,
    tag: String,
    handler: Handler,
}

struct BrokerInner {
    uri: String,
    state: RwLock<BrokerState>,
    topology: Mutex<Topology>,
    consumers: Mutex<Vec<ConsumerSpec>>,
    reconnect_tx: mpsc::UnboundedSender<()>,
    closed: AtomicBool,
}

/// AMQP client shared by a whole process. Cheap to clone.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Dial the broker. Failure here is fatal; reconnection only guards the
    /// connection once it has been established.
    pub async fn connect(uri: &str) -> Result<Self> {
        let (connection, channel) = dial(uri).await?;
        info!("connected to message broker");

        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(BrokerInner {
            uri: uri.to_string(),
            state: RwLock::new(BrokerState {
                connection,
                channel,
            }),
            topology: Mutex::new(Topology::default()),
            consumers: Mutex::new(Vec::new()),
            reconnect_tx,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(supervise(inner.clone(), reconnect_rx));

        Ok(Self { inner })
    }

    /// Declare a durable exchange and remember it for reconnects.
    pub async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> AppResult<()> {
        let channel = self.channel().await;
        channel
            .exchange_declare(
                name,
                kind.clone(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        self.inner.topology.lock().await.record_exchange(name, kind);
        Ok(())
    }

    /// Declare a durable queue.
    pub async fn declare_queue(&self, name: &str) -> AppResult<()> {
        let channel = self.channel().await;
        channel
            .queue_declare(name, durable_queue(), FieldTable::default())
            .await?;
        self.inner.topology.lock().await.record_queue(name, None);
        Ok(())
    }

    /// Declare a durable queue whose rejected deliveries route to `dlx`.
    pub async fn declare_queue_with_dlx(&self, name: &str, dlx: &str) -> AppResult<()> {
        let channel = self.channel().await;
        channel
            .queue_declare(name, durable_queue(), dlx_arguments(dlx))
            .await?;
        self.inner
            .topology
            .lock()
            .await
            .record_queue(name, Some(dlx));
        Ok(())
    }

    /// Bind a queue to an exchange with a routing pattern.
    pub async fn bind_queue(&self, queue: &str, routing_key: &str, exchange: &str) -> AppResult<()> {
        let channel = self.channel().await;
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.inner
            .topology
            .lock()
            .await
            .record_binding(queue, routing_key, exchange);
        Ok(())
    }

    /// Publish straight to a queue through the default exchange. Used as the
    /// fallback path when a routed publish fails.
    pub async fn publish<T: Serialize + ?Sized>(&self, queue: &str, payload: &T) -> AppResult<()> {
        self.publish_to_exchange("", queue, payload).await
    }

    /// Publish a persistent JSON payload to an exchange with a routing key.
    pub async fn publish_to_exchange<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> AppResult<()> {
        let body = serde_json::to_vec(payload)?;
        let channel = self.channel().await;

        let result = async {
            channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default()
                        .with_content_type("application/json".into())
                        .with_delivery_mode(2),
                )
                .await?
                .await?;
            Ok::<(), lapin::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                debug!(exchange, routing_key, "event published");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, exchange, routing_key, "failed to publish event");
                self.nudge_reconnect();
                Err(AppError::from(e))
            }
        }
    }

    /// Register a consumer on `queue`. The handler decides ack/requeue/
    /// dead-letter per delivery; the consumer survives reconnects.
    pub async fn consume(&self, queue: &str, tag: &str, handler: Handler) -> AppResult<()> {
        let spec = ConsumerSpec {
            queue: queue.to_string(),
            tag: tag.to_string(),
            handler,
        };
        self.inner.consumers.lock().await.push(spec.clone());
        spawn_consumer(self.inner.clone(), spec);
        Ok(())
    }

    /// Close the channel and connection. Intended for shutdown only; no
    /// reconnect is attempted afterwards.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let state = self.inner.state.read().await;
        if let Err(e) = state.channel.close(200, "shutdown").await {
            debug!(error = %e, "channel close failed");
        }
        if let Err(e) = state.connection.close(200, "shutdown").await {
            debug!(error = %e, "connection close failed");
        }
    }

    async fn channel(&self) -> Channel {
        self.inner.state.read().await.channel.clone()
    }

    fn nudge_reconnect(&self) {
        let _ = self.inner.reconnect_tx.send(());
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

fn dlx_arguments(dlx: &str) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dlx.to_string().into()),
    );
    args
}

async fn dial(uri: &str) -> Result<(Connection, Channel)> {
    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .context("failed to connect to message broker")?;
    let channel = connection
        .create_channel()
        .await
        .context("failed to open broker channel")?;
    Ok((connection, channel))
}

/// Waits for trouble reports, then re-dials until the topology is restored.
async fn supervise(inner: Arc<BrokerInner>, mut reconnect_rx: mpsc::UnboundedReceiver<()>) {
    while reconnect_rx.recv().await.is_some() {
        // Coalesce the burst of reports a single outage produces.
        while reconnect_rx.try_recv().is_ok() {}

        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        if inner.state.read().await.connection.status().connected() {
            continue;
        }

        warn!("broker connection lost, reconnecting");
        reestablish(&inner).await;
    }
}

async fn reestablish(inner: &Arc<BrokerInner>) {
    loop {
        tokio::time::sleep(Duration::from_secs(BROKER_RECONNECT_DELAY_SECS)).await;
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let (connection, channel) = match dial(&inner.uri).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "broker reconnect failed, retrying in 5s");
                continue;
            }
        };

        let topology = inner.topology.lock().await.clone();
        if let Err(e) = restore(&channel, &topology).await {
            warn!(error = %e, "failed to restore broker topology, retrying in 5s");
            continue;
        }

        {
            let mut state = inner.state.write().await;
            *state = BrokerState {
                connection,
                channel,
            };
        }

        let consumers = inner.consumers.lock().await.clone();
        for spec in consumers {
            spawn_consumer(inner.clone(), spec);
        }

        info!("broker connection re-established");
        return;
    }
}

/// Re-declare exchanges and queues, then re-bind, in declaration order.
async fn restore(channel: &Channel, topology: &Topology) -> Result<(), lapin::Error> {
    for exchange in &topology.exchanges {
        channel
            .exchange_declare(
                &exchange.name,
                exchange.kind.clone(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }
    for queue in &topology.queues {
        let args = match &queue.dead_letter_exchange {
            Some(dlx) => dlx_arguments(dlx),
            None => FieldTable::default(),
        };
        channel.queue_declare(&queue.name, durable_queue(), args).await?;
    }
    for binding in &topology.bindings {
        channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }
    Ok(())
}

fn spawn_consumer(inner: Arc<BrokerInner>, spec: ConsumerSpec) {
    tokio::spawn(async move {
        let channel = inner.state.read().await.channel.clone();
        let mut consumer = match channel
            .basic_consume(
                &spec.queue,
                &spec.tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, queue = %spec.queue, "failed to start consumer");
                let _ = inner.reconnect_tx.send(());
                return;
            }
        };

        info!(queue = %spec.queue, tag = %spec.tag, "consumer started");

        while let Some(delivery) = consumer.next().await {
            let mut delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(error = %e, queue = %spec.queue, "consumer stream error");
                    break;
                }
            };

            let payload = std::mem::take(&mut delivery.data);
            match (spec.handler)(payload).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        warn!(error = %e, queue = %spec.queue, "failed to ack delivery");
                    }
                }
                Err(ConsumeError::Discard(reason)) => {
                    warn!(reason = %reason, queue = %spec.queue, "discarding delivery to dead-letter exchange");
                    if let Err(e) = delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await
                    {
                        warn!(error = %e, queue = %spec.queue, "failed to nack delivery");
                    }
                }
                Err(ConsumeError::Requeue(reason)) => {
                    warn!(reason = %reason, queue = %spec.queue, "requeueing delivery");
                    if let Err(e) = delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await
                    {
                        warn!(error = %e, queue = %spec.queue, "failed to nack delivery");
                    }
                }
            }
        }

        // The stream only ends when the channel dies; a fresh consumer task
        // is spawned after the topology is restored.
        if !inner.closed.load(Ordering::SeqCst) {
            let _ = inner.reconnect_tx.send(());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlx_argument_is_set() {
        let args = dlx_arguments("dead-letters");
        let key: lapin::types::ShortString = "x-dead-letter-exchange".into();
        match args.inner().get(&key) {
            Some(AMQPValue::LongString(s)) => assert_eq!(s.to_string(), "dead-letters"),
            other => panic!("unexpected argument value: {:?}", other),
        }
    }

    #[test]
    fn queues_are_durable() {
        assert!(durable_queue().durable);
        assert!(!durable_queue().exclusive);
        assert!(!durable_queue().auto_delete);
    }
}
