//! Order mutation service.
//!
//! Exposes the add/remove-album-from-order operations the request path
//! calls synchronously. Each mutation is guarded by a domain precondition
//! against the user's current unpaid order and executed by the store inside
//! a serializable transaction, so two concurrent mutations of the same
//! order cannot both observe stale state and corrupt the album set or
//! total price.
//!
//! This service is never driven by the broker, but its discipline is what
//! the asynchronous settlement step depends on: by the time a buy event is
//! processed, the unpaid order's album set and total price are consistent
//! and stay immutable until the order is paid.
//!
//! # Errors
//!
//! Callers get three distinct classes and must treat them differently:
//! [`OrderError::AlreadyInOrder`] / [`OrderError::NotInOrder`] are domain
//! precondition violations (client errors, never retried);
//! `OrderError::Store(StoreError::Serialization)` is a concurrency abort
//! the caller may retry; anything else is a plain database failure.

use std::sync::Arc;
use thiserror::Error;
use wavecart_core::model::Order;
use wavecart_core::store::{OrderStore, StoreError};

/// Errors returned to the order service's synchronous caller.
#[derive(Error, Debug)]
pub enum OrderError {
    /// The album is already in the user's unpaid order.
    #[error("album is already in the order")]
    AlreadyInOrder,

    /// The album is not in the user's unpaid order.
    #[error("album is not in the order")]
    NotInOrder,

    /// The store rejected the operation (see [`StoreError`] for the
    /// serialization/database distinction).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Whether this is a domain precondition violation the caller should
    /// surface as a client error (as opposed to a database-class failure).
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::AlreadyInOrder | Self::NotInOrder)
    }
}

/// Add/remove-album operations over a user's unpaid order.
pub struct OrderService<S> {
    store: Arc<S>,
}

impl<S: OrderStore> OrderService<S> {
    /// Create the service over a store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Add an album to the user's unpaid order, creating the order if the
    /// user has none.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::AlreadyInOrder`] if the unpaid order already
    /// contains the album, or a store error from the mutation itself.
    pub async fn add_album_to_order(
        &self,
        user_id: i64,
        album_id: i64,
    ) -> Result<(), OrderError> {
        if let Some(order) = self.store.get_unpaid_order(user_id).await? {
            if order.contains_album(album_id) {
                return Err(OrderError::AlreadyInOrder);
            }
        }

        self.store.add_album_to_order(user_id, album_id).await?;
        tracing::debug!(user_id = user_id, album_id = album_id, "album added to order");
        Ok(())
    }

    /// Remove an album from the user's unpaid order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::NotInOrder`] if the user has no unpaid order
    /// or it does not contain the album, or a store error from the
    /// mutation itself.
    pub async fn remove_album_from_order(
        &self,
        user_id: i64,
        album_id: i64,
    ) -> Result<(), OrderError> {
        match self.store.get_unpaid_order(user_id).await? {
            Some(order) if order.contains_album(album_id) => {
                self.store.remove_album_from_order(user_id, album_id).await?;
                tracing::debug!(
                    user_id = user_id,
                    album_id = album_id,
                    "album removed from order"
                );
                Ok(())
            }
            _ => Err(OrderError::NotInOrder),
        }
    }

    /// The user's current unpaid order, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn unpaid_order(&self, user_id: i64) -> Result<Option<Order>, OrderError> {
        Ok(self.store.get_unpaid_order(user_id).await?)
    }
}
