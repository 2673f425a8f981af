//! Message bus abstraction over the topic-partitioned broker.
//!
//! The storefront's asynchronous pipeline moves two kinds of traffic across
//! the broker: commerce events (deposit and purchase requests) on the
//! [`topics::MONEY_OPERATIONS`] topic, and outcome notifications on the
//! [`topics::NOTIFICATIONS`] topic. Both travel as an opaque byte payload
//! plus a string key; the key exists solely so consumers can deduplicate
//! redeliveries (see [`crate::dedup::DedupWindow`]).
//!
//! # Delivery Semantics
//!
//! The bus provides **at-least-once** delivery. A message may be observed
//! more than once by a subscriber, and consumers are expected to guard with
//! the dedup window rather than rely on the transport. Publishing is
//! acknowledged by all broker replicas with a bounded retry count fixed at
//! construction; a rejected write surfaces as [`BusError::PublishFailed`]
//! and the caller decides whether to escalate or log-and-drop.
//!
//! # Implementations
//!
//! - `KafkaBus` (the `wavecart-kafka` crate) — production, rdkafka-backed
//! - `MemoryBus` (the `wavecart-testing` crate) — in-process, for tests

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Well-known topic names used by the pipeline.
pub mod topics {
    /// Commerce events published by the request path, consumed by the
    /// money-operations processor.
    pub const MONEY_OPERATIONS: &str = "money-operations";

    /// Outcome notifications published by the processor (and the admin
    /// flow), consumed by the fan-out service.
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that rejected the write.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Network or transport error while polling.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A message as observed by a subscriber: the broker key plus the payload.
///
/// The key is assigned by the publishing adapter (a per-producer sequence
/// number combined with a producer identity) and is meaningful only for
/// deduplication; payload interpretation is left to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Deduplication key assigned by the producer.
    pub key: String,
    /// Opaque message payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from a key and payload.
    #[must_use]
    pub const fn new(key: String, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }
}

/// Stream of envelopes yielded by a subscription.
///
/// Each item is either a received message or a transport-level error; poll
/// errors are not fatal and the stream continues yielding after reporting
/// one.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Envelope, BusError>> + Send>>;

/// Publish/subscribe access to the topic-partitioned broker.
///
/// Implementations own message-key generation on the publish side: callers
/// hand over a payload and the adapter assigns a unique key before
/// submitting to the broker.
///
/// The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it stays dyn-compatible (`Arc<dyn MessageBus>` is how the
/// services hold it).
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a topic.
    ///
    /// The adapter assigns the message key and submits with acknowledgment
    /// from all replicas and its configured bounded retry count.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker rejects the write
    /// after retries are exhausted.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_construction() {
        let envelope = Envelope::new("1-42".to_string(), vec![1, 2, 3]);
        assert_eq!(envelope.key, "1-42");
        assert_eq!(envelope.payload, vec![1, 2, 3]);
    }

    #[test]
    fn bus_error_display() {
        let err = BusError::PublishFailed {
            topic: topics::NOTIFICATIONS.to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "publish failed for topic 'notifications': broker down"
        );
    }
}
