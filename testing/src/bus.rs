//! In-process message bus over tokio broadcast channels.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use wavecart_core::bus::{BusError, Envelope, MessageBus, MessageStream};

const TOPIC_CAPACITY: usize = 256;

/// In-memory [`MessageBus`] for tests.
///
/// Topics are created on demand; every subscription sees messages published
/// after it was established (subscribe before publishing, as with a fresh
/// consumer group on a live broker). Publishing with no subscriber succeeds
/// and the message is dropped.
///
/// Like the production bus, `MemoryBus` owns key generation
/// (`{sequence}-{producer_id}`); [`MemoryBus::publish_with_key`] bypasses
/// it so tests can replay a key and exercise dedup behavior.
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    sequence: AtomicU64,
    producer_id: u64,
}

impl MemoryBus {
    /// Create a bus with producer identity 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_producer_id(0)
    }

    /// Create a bus with an explicit producer identity.
    #[must_use]
    pub fn with_producer_id(producer_id: u64) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            producer_id,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Envelope> {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish with an explicit key, bypassing key generation. Lets tests
    /// deliver the same key twice the way a broker redelivery would.
    pub fn publish_with_key(&self, topic: &str, key: &str, payload: &[u8]) {
        let envelope = Envelope::new(key.to_string(), payload.to_vec());
        // No subscriber is fine: the message is simply dropped.
        let _ = self.sender(topic).send(envelope);
    }

    /// Number of live subscriptions on a topic. Lets tests wait until a
    /// consumer loop spawned on another task has actually subscribed
    /// before publishing.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close every topic. Live subscriptions end their streams once the
    /// already-buffered messages are drained, which lets a consumer loop
    /// under test run to completion.
    pub fn close(&self) {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let key = format!("{sequence}-{}", self.producer_id);
        self.publish_with_key(topic, &key, payload);
        Box::pin(async { Ok(()) })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let receivers: Vec<broadcast::Receiver<Envelope>> = topics
            .iter()
            .map(|topic| self.sender(topic).subscribe())
            .collect();

        Box::pin(async move {
            let (tx, rx) = tokio::sync::mpsc::channel(TOPIC_CAPACITY);

            for mut receiver in receivers {
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        match receiver.recv().await {
                            Ok(envelope) => {
                                if tx.send(Ok(envelope)).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped = skipped, "memory bus lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }
            drop(tx);

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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscriber_receives_published_messages_with_generated_keys() {
        let bus = MemoryBus::with_producer_id(7);
        let mut stream = bus.subscribe(&["money-operations"]).await.unwrap();

        bus.publish("money-operations", b"first").await.unwrap();
        bus.publish("money-operations", b"second").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.key, "1-7");
        assert_eq!(first.payload, b"first");

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.key, "2-7");
    }

    #[tokio::test]
    async fn close_ends_subscription_streams() {
        let bus = MemoryBus::new();
        let mut stream = bus.subscribe(&["notifications"]).await.unwrap();

        bus.publish("notifications", b"last").await.unwrap();
        bus.close();

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let bus = MemoryBus::new();
        bus.publish("notifications", b"dropped").await.unwrap();
    }
}
