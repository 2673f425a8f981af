//! Kafka implementation of the Wavecart message bus.
//!
//! This crate provides [`KafkaBus`], the production implementation of the
//! [`MessageBus`] trait from `wavecart-core`, built on rdkafka. It works
//! against any Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once**, on both sides:
//!
//! - Publishes wait for acknowledgment from all replicas (`acks=all`) with
//!   a bounded retry count fixed at construction (default 5). A write the
//!   broker still rejects surfaces as [`BusError::PublishFailed`].
//! - Consumption commits offsets only *after* a message has been handed to
//!   the subscriber's channel. A crash before commit means redelivery, so
//!   consumers deduplicate by message key (see
//!   `wavecart_core::dedup::DedupWindow`).
//!
//! # Message Keys
//!
//! The bus owns key generation: every published message is keyed
//! `{sequence}-{producer_id}`, where the sequence is a per-producer
//! monotonic counter and the producer identity distinguishes concurrent
//! publishers. The key carries no routing meaning — it exists solely so
//! consumers can discard redeliveries.
//!
//! # Example
//!
//! ```no_run
//! use wavecart_kafka::KafkaBus;
//! use wavecart_core::bus::{MessageBus, topics};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = KafkaBus::builder()
//!     .brokers("localhost:9092")
//!     .producer_id(1)
//!     .build()?;
//!
//! bus.publish(topics::MONEY_OPERATIONS, br#"{"type":"deposit","userID":1,"amount":5.0}"#)
//!     .await?;
//!
//! let mut stream = bus.subscribe(&[topics::NOTIFICATIONS]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(envelope) => println!("received key {}", envelope.key),
//!         Err(e) => eprintln!("poll error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use wavecart_core::bus::{BusError, Envelope, MessageBus, MessageStream};

/// Default bounded retry count for publishes.
pub const DEFAULT_PUBLISH_RETRIES: u32 = 5;

/// Kafka-backed message bus.
///
/// One instance owns one producer (and its key sequence) and can create any
/// number of consumer subscriptions. Cheap to share behind an `Arc`.
pub struct KafkaBus {
    /// Producer for publishing messages.
    producer: FutureProducer,
    /// Broker addresses (used when creating consumers).
    brokers: String,
    /// Producer identity baked into every message key.
    producer_id: u64,
    /// Monotonic per-producer sequence for key generation.
    sequence: AtomicU64,
    /// Producer send timeout.
    timeout: Duration,
    /// Consumer group ID (if explicitly set).
    consumer_group: Option<String>,
    /// Envelope buffer size for subscriptions.
    buffer_size: usize,
    /// Auto offset reset policy for new consumer groups.
    auto_offset_reset: String,
}

impl KafkaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str, producer_id: u64) -> Result<Self, BusError> {
        Self::builder()
            .brokers(brokers)
            .producer_id(producer_id)
            .build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> KafkaBusBuilder {
        KafkaBusBuilder::default()
    }

    /// The configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn next_key(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        message_key(sequence, self.producer_id)
    }
}

/// Format a message key from a sequence number and producer identity.
#[must_use]
pub fn message_key(sequence: u64, producer_id: u64) -> String {
    format!("{sequence}-{producer_id}")
}

/// Builder for configuring a [`KafkaBus`].
#[derive(Default)]
pub struct KafkaBusBuilder {
    brokers: Option<String>,
    producer_id: Option<u64>,
    retries: Option<u32>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl KafkaBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer identity used in message keys.
    ///
    /// Each concurrently-publishing process must use a distinct identity,
    /// or consumers may deduplicate messages from different producers
    /// against each other. Defaults to the process id.
    #[must_use]
    pub const fn producer_id(mut self, producer_id: u64) -> Self {
        self.producer_id = Some(producer_id);
        self
    }

    /// Set the bounded publish retry count.
    ///
    /// Default: [`DEFAULT_PUBLISH_RETRIES`].
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is generated from the sorted topic names, so
    /// every service consuming the same topics shares one group.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the envelope buffer size for subscriptions (default: 1000).
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where new consumer groups start reading: `"earliest"` or
    /// `"latest"` (default: `"earliest"`, so a freshly deployed consumer
    /// drains the backlog).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<KafkaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;
        let retries = self.retries.unwrap_or(DEFAULT_PUBLISH_RETRIES);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("acks", "all")
            .set("retries", retries.to_string())
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| {
                BusError::ConnectionFailed(format!("failed to create producer: {e}"))
            })?;

        let producer_id = self
            .producer_id
            .unwrap_or_else(|| u64::from(std::process::id()));

        tracing::info!(
            brokers = %brokers,
            producer_id = producer_id,
            retries = retries,
            "Kafka bus created"
        );

        Ok(KafkaBus {
            producer,
            brokers,
            producer_id,
            sequence: AtomicU64::new(0),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

impl MessageBus for KafkaBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_vec();
        let key = self.next_key();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        "message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "failed to publish message"
                    );
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("wavecart-{}", sorted_topics.join("-"))
            });

            // Manual commit after channel delivery keeps at-least-once.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %auto_offset_reset,
                "subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The pump task owns the consumer and forwards envelopes; the
            // subscription stays alive until the receiver is dropped.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(poll_result) = stream.next().await {
                    match poll_result {
                        Ok(message) => {
                            let envelope = Envelope::new(
                                envelope_key(&message),
                                message.payload().unwrap_or_default().to_vec(),
                            );

                            // Commit only after the envelope is accepted by
                            // the channel; a crash before this point means
                            // redelivery, never loss.
                            if tx.send(Ok(envelope)).await.is_err() {
                                tracing::debug!("subscriber dropped, pump task exiting");
                                break;
                            }

                            if let Err(e) =
                                consumer.commit_message(&message, CommitMode::Async)
                            {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "offset commit failed, message may be redelivered"
                                );
                            }
                        }
                        Err(e) => {
                            let err = BusError::Transport(e.to_string());
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("pump task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

/// Deduplication key for a received message: the producer-assigned key, or
/// the topic coordinates when a foreign producer published without one (the
/// coordinates are stable across redeliveries, so dedup still holds).
fn envelope_key(message: &rdkafka::message::BorrowedMessage<'_>) -> String {
    message.key().map_or_else(
        || {
            format!(
                "{}-{}-{}",
                message.topic(),
                message.partition(),
                message.offset()
            )
        },
        |key| String::from_utf8_lossy(key).into_owned(),
    )
}
