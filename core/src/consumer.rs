//! The polling consume loop shared by the pipeline services.
//!
//! [`ConsumerLoop`] is the consume side of the broker channel adapter: an
//! unbounded poll loop with a short fixed timeout, an idempotent-redelivery
//! guard (the [`DedupWindow`]), and bounded concurrent handler dispatch.
//! Handlers run as independent tasks so a slow store call for one user
//! never delays events for other users; the in-flight count is capped by a
//! semaphore so burst load cannot spawn without limit.
//!
//! The loop never terminates on its own against a live broker — connection
//! loss shows up as repeated timeout- or error-class poll results and the
//! loop keeps polling; restarting the process is the only recovery path.
//! The loop does exit if the underlying stream ends, which only the
//! in-memory test bus ever does.
//!
//! Processing guarantees are an at-least-once/at-most-once hybrid: the
//! dedup window approximates exactly-once over the at-least-once transport,
//! but it is in-memory, so a restart may re-process an already-handled
//! event. No ordering is guaranteed between dispatched handlers, even for
//! the same user; the store's transaction isolation is the correctness
//! backstop, not the pipeline.

use crate::bus::{BusError, MessageBus};
use crate::dedup::DedupWindow;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Default cap on concurrently running handler tasks.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Default poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Error type handlers report back through the loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A failure observed while consuming, reported through the `on_error`
/// callback. Neither kind stops the loop.
#[derive(Error, Debug)]
pub enum ConsumeError {
    /// A non-timeout poll failure from the transport.
    #[error("poll error: {0}")]
    Poll(#[from] BusError),

    /// A handler rejected a message.
    #[error("handler error: {0}")]
    Handler(String),
}

/// Poll-based consumer over a [`MessageBus`] subscription.
///
/// Owns the dedup window for its topics; duplicate keys are silently
/// discarded before the handler is ever invoked.
pub struct ConsumerLoop<B> {
    bus: Arc<B>,
    topics: Vec<String>,
    dedup: DedupWindow,
    max_in_flight: usize,
    poll_timeout: Duration,
}

impl<B> ConsumerLoop<B> {
    /// Create a loop over `topics` using the given dedup window.
    #[must_use]
    pub fn new(bus: Arc<B>, topics: Vec<String>, dedup: DedupWindow) -> Self {
        Self {
            bus,
            topics,
            dedup,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Cap the number of concurrently running handler tasks.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Override the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }
}

impl<B: MessageBus> ConsumerLoop<B> {
    /// Subscribe and consume until the process exits.
    ///
    /// Per received message: a key already in the dedup window is discarded;
    /// a fresh key is marked seen and `handler` is dispatched as an
    /// independent task. Handler success is reported through `on_success`,
    /// handler failure and non-timeout poll errors through `on_error`; the
    /// loop continues in every case.
    ///
    /// Polling blocks only on network I/O with a bounded timeout — the bus
    /// implementations deliver through channel-backed streams, so the
    /// timeout wrapper never loses a message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the initial subscription
    /// cannot be established; this is the only error that escapes the loop.
    pub async fn run_forever<H, Fut, OnOk, OnErr>(
        &self,
        handler: H,
        on_success: OnOk,
        on_error: OnErr,
    ) -> Result<(), BusError>
    where
        H: Fn(Vec<u8>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        OnOk: Fn() + Send + Sync + Clone + 'static,
        OnErr: Fn(&ConsumeError) + Send + Sync + Clone + 'static,
    {
        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        let mut stream = self.bus.subscribe(&topic_refs).await?;
        let limiter = Arc::new(Semaphore::new(self.max_in_flight));

        tracing::info!(
            topics = ?self.topics,
            max_in_flight = self.max_in_flight,
            "consumer loop started"
        );

        loop {
            match tokio::time::timeout(self.poll_timeout, stream.next()).await {
                // Poll timeout: not an error, keep polling.
                Err(_) => {}
                // Stream ended (in-memory bus only).
                Ok(None) => break,
                Ok(Some(Err(err))) => on_error(&ConsumeError::Poll(err)),
                Ok(Some(Ok(envelope))) => {
                    if !self.dedup.insert(&envelope.key) {
                        tracing::debug!(key = %envelope.key, "duplicate message discarded");
                        continue;
                    }

                    let Ok(permit) = limiter.clone().acquire_owned().await else {
                        break;
                    };
                    let handler = handler.clone();
                    let on_success = on_success.clone();
                    let on_error = on_error.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        match handler(envelope.payload).await {
                            Ok(()) => on_success(),
                            Err(err) => on_error(&ConsumeError::Handler(err.to_string())),
                        }
                    });
                }
            }
        }

        // Wait for in-flight handlers before reporting the stream end.
        #[allow(clippy::cast_possible_truncation)] // max_in_flight is small
        let _ = limiter.acquire_many(self.max_in_flight as u32).await;

        tracing::info!(topics = ?self.topics, "message stream ended, consumer loop exiting");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::bus::{Envelope, MessageStream};
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields a scripted sequence of poll results, then ends the stream.
    struct ScriptedBus {
        script: Mutex<Vec<Result<Envelope, BusError>>>,
    }

    impl ScriptedBus {
        fn new(script: Vec<Result<Envelope, BusError>>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    impl MessageBus for ScriptedBus {
        fn publish(
            &self,
            _topic: &str,
            _payload: &[u8],
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            _topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
            let script = std::mem::take(&mut *self.script.lock().unwrap());
            Box::pin(async move {
                Ok(Box::pin(futures::stream::iter(script)) as MessageStream)
            })
        }
    }

    fn envelope(key: &str, payload: &[u8]) -> Result<Envelope, BusError> {
        Ok(Envelope::new(key.to_string(), payload.to_vec()))
    }

    #[tokio::test]
    async fn duplicate_key_invokes_handler_exactly_once() {
        let bus = Arc::new(ScriptedBus::new(vec![
            envelope("1-0", b"first"),
            envelope("1-0", b"redelivery"),
            envelope("2-0", b"second"),
        ]));
        let consumer = ConsumerLoop::new(
            bus,
            vec!["money-operations".to_string()],
            DedupWindow::default(),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let successes = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let on_ok = successes.clone();

        consumer
            .run_forever(
                move |_payload| {
                    handler_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), HandlerError>(()) }
                },
                move || {
                    on_ok.fetch_add(1, Ordering::SeqCst);
                },
                |_err| {},
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(successes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poll_errors_are_reported_and_loop_continues() {
        let bus = Arc::new(ScriptedBus::new(vec![
            Err(BusError::Transport("broker hiccup".to_string())),
            envelope("1-0", b"after the error"),
        ]));
        let consumer = ConsumerLoop::new(
            bus,
            vec!["notifications".to_string()],
            DedupWindow::default(),
        );

        let handled = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let handler_count = handled.clone();
        let error_count = errors.clone();

        consumer
            .run_forever(
                move |_payload| {
                    handler_count.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), HandlerError>(()) }
                },
                || {},
                move |err| {
                    assert!(matches!(err, ConsumeError::Poll(_)));
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await
            .unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_are_reported_via_on_error() {
        let bus = Arc::new(ScriptedBus::new(vec![envelope("1-0", b"bad")]));
        let consumer = ConsumerLoop::new(
            bus,
            vec!["money-operations".to_string()],
            DedupWindow::default(),
        );

        let errors = Arc::new(AtomicUsize::new(0));
        let error_count = errors.clone();

        consumer
            .run_forever(
                |_payload| async {
                    Err::<(), HandlerError>("unparseable".to_string().into())
                },
                || {},
                move |err| {
                    assert!(matches!(err, ConsumeError::Handler(_)));
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await
            .unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
