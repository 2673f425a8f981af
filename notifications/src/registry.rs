//! Live-connection registry and best-effort delivery.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use wavecart_core::event::{EventError, OutcomeNotification};

/// Maps each connected user to the mailbox of their one live connection.
///
/// Register and unregister are idempotent and mutually exclusive under a
/// single lock; registering a user who already has a mailbox replaces it
/// (last write wins — at most one live connection per user). The lock is
/// held only for the map lookup or mutation, never across a send, so one
/// user's slow mailbox cannot block another user's registration.
#[derive(Debug, Default)]
pub struct NotificationRegistry {
    mailboxes: Mutex<HashMap<i64, mpsc::Sender<OutcomeNotification>>>,
}

impl NotificationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a mailbox to a user, replacing any existing one.
    pub fn register(&self, user_id: i64, mailbox: mpsc::Sender<OutcomeNotification>) {
        let previous = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, mailbox);
        if previous.is_some() {
            tracing::debug!(user_id = user_id, "existing connection replaced");
        }
    }

    /// Drop the user's mailbox, if any.
    pub fn unregister(&self, user_id: i64) {
        self.mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    /// Drop the user's mailbox only if it is still `mailbox`. Connection
    /// teardown uses this so a connection that was already replaced by a
    /// newer one cannot tear down the newer mailbox.
    pub fn unregister_if_current(
        &self,
        user_id: i64,
        mailbox: &mpsc::Sender<OutcomeNotification>,
    ) {
        let mut mailboxes = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if mailboxes
            .get(&user_id)
            .is_some_and(|current| current.same_channel(mailbox))
        {
            mailboxes.remove(&user_id);
        }
    }

    /// Number of currently registered users.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver a notification to its target user's mailbox, best-effort.
    ///
    /// Returns `true` if the mailbox accepted it. A user with no live
    /// connection, a full mailbox, or a mailbox whose connection just
    /// closed all mean the notification is dropped — that is the delivery
    /// boundary, not an error, and nothing is retried or queued.
    pub fn deliver(&self, notification: OutcomeNotification) -> bool {
        let user_id = notification.user_id();
        let mailbox = self
            .mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned();

        let Some(mailbox) = mailbox else {
            tracing::debug!(user_id = user_id, "no live connection, notification dropped");
            return false;
        };

        match mailbox.try_send(notification) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(user_id = user_id, error = %err, "mailbox unavailable, notification dropped");
                false
            }
        }
    }

    /// Fan-out handler for one raw payload from the notifications topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if the payload is not a recognizable outcome
    /// notification. An unreachable recipient is not an error.
    pub fn route(&self, payload: &[u8]) -> Result<(), EventError> {
        let notification = OutcomeNotification::decode(payload)?;
        self.deliver(notification);
        Ok(())
    }
}
