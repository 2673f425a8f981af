//! Money-operations settlement processor.
//!
//! Consumes [`CommerceEvent`]s from the money-operations topic and applies
//! each against the store: a deposit adjusts the user's balance, a buy
//! settles the unpaid order through the store's single serializable
//! transaction (verify balance, decrement, mark paid — atomically).
//!
//! Every event is terminal in one step. Whatever the store says, the
//! processor publishes an [`OutcomeNotification`] with the success flag to
//! the notifications topic and moves on: store failures are reported to
//! the user through that flag, never retried here, and a failed
//! notification publish is logged and dropped (accepted at-most-once
//! notification delivery).
//!
//! The request path validates balance sufficiency before publishing a buy
//! event, but a race against a concurrent balance-consuming operation is
//! still possible; the store transaction's isolation level catches it, not
//! application logic here.

pub mod config;

use std::sync::Arc;
use thiserror::Error;
use wavecart_core::bus::{MessageBus, topics};
use wavecart_core::event::{CommerceEvent, EventError, OutcomeNotification};
use wavecart_core::store::UserStore;

/// Errors the processor reports back to the consume loop.
///
/// Only undecodable payloads surface here; store failures are outcomes,
/// not handler errors, and are reported through the notification's success
/// flag instead.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The payload was not a recognizable commerce event.
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Consumes commerce events and settles them against the store.
pub struct SettlementProcessor<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
}

impl<S: UserStore, B: MessageBus> SettlementProcessor<S, B> {
    /// Create a processor over a store and the bus it publishes outcomes
    /// to.
    #[must_use]
    pub const fn new(store: Arc<S>, bus: Arc<B>) -> Self {
        Self { store, bus }
    }

    /// Handle one raw event payload from the money-operations topic.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Event`] if the payload cannot be decoded
    /// (including an unrecognized `type` tag). A decoded event always
    /// succeeds from the loop's point of view — its outcome travels in the
    /// published notification.
    pub async fn handle_event(&self, payload: Vec<u8>) -> Result<(), ProcessError> {
        match CommerceEvent::decode(&payload)? {
            CommerceEvent::Deposit { user_id, amount } => self.deposit(user_id, amount).await,
            CommerceEvent::Buy { user_id, order_id } => self.buy(user_id, order_id).await,
        }
        Ok(())
    }

    async fn deposit(&self, user_id: i64, amount: f64) {
        let result = self.store.change_balance(user_id, amount).await;
        let success = result.is_ok();

        if let Err(err) = result {
            tracing::warn!(user_id = user_id, amount = amount, error = %err, "deposit failed");
        }
        metrics::counter!("settlement.deposit", "success" => success.to_string()).increment(1);

        self.publish_outcome(OutcomeNotification::Deposit { user_id, success })
            .await;
    }

    async fn buy(&self, user_id: i64, order_id: i64) {
        let result = self.store.pay_for_order(user_id, order_id).await;
        let success = result.is_ok();

        if let Err(err) = result {
            tracing::warn!(
                user_id = user_id,
                order_id = order_id,
                error = %err,
                "order settlement failed"
            );
        }
        metrics::counter!("settlement.buy", "success" => success.to_string()).increment(1);

        self.publish_outcome(OutcomeNotification::Buy {
            user_id,
            order_id,
            success,
        })
        .await;
    }

    /// Best-effort outcome publish: failures are logged, never retried, and
    /// never fed back into the original event.
    async fn publish_outcome(&self, notification: OutcomeNotification) {
        let payload = match notification.encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "unable to encode outcome notification");
                return;
            }
        };

        if let Err(err) = self.bus.publish(topics::NOTIFICATIONS, &payload).await {
            tracing::warn!(
                user_id = notification.user_id(),
                error = %err,
                "unable to publish outcome notification"
            );
        }
    }
}
