//! Store traits the pipeline mutates state through.
//!
//! The relational store is an external collaborator; these traits pin down
//! the contract the pipeline depends on. The production implementation
//! (`wavecart-postgres`) backs them with serializable transactions and the
//! storefront's stored procedures; the test double (`wavecart-testing`)
//! applies the same semantics to in-memory state.
//!
//! Like the bus trait, these use explicit `Pin<Box<dyn Future>>` returns so
//! the services can hold them as trait objects.

use crate::model::Order;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by store operations.
///
/// The taxonomy matters to callers: [`StoreError::InsufficientFunds`] and
/// [`StoreError::OrderNotFound`] are domain outcomes reported to the user
/// (a failed settlement, never retried here), while
/// [`StoreError::Serialization`] is a concurrency abort under serializable
/// isolation — a generic database-class error the caller may retry — and
/// [`StoreError::Database`] covers everything else.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The user's balance does not cover the order total.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// No matching order exists (wrong id, wrong owner, or already paid).
    #[error("order not found")]
    OrderNotFound,

    /// The transaction was aborted by serializable-isolation conflict
    /// detection; state is unchanged and a retry may succeed.
    #[error("serialization conflict")]
    Serialization,

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Boxed future returned by the store traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Balance and settlement mutations on user accounts.
pub trait UserStore: Send + Sync {
    /// Adjust the user's balance by `amount` (positive for deposits).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    fn change_balance(&self, user_id: i64, amount: f64) -> StoreFuture<'_, ()>;

    /// Settle an order: atomically verify sufficient balance, decrement it
    /// by the order total, and mark the order paid — a single serializable
    /// transaction. Any failure leaves state unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InsufficientFunds`], [`StoreError::OrderNotFound`],
    /// [`StoreError::Serialization`], or [`StoreError::Database`].
    fn pay_for_order(&self, user_id: i64, order_id: i64) -> StoreFuture<'_, ()>;
}

/// Order-content mutations and the unpaid-order read.
pub trait OrderStore: Send + Sync {
    /// Add an album to the user's unpaid order, creating the order if none
    /// exists, inside a serializable transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] on a concurrency abort or
    /// [`StoreError::Database`] for other failures.
    fn add_album_to_order(&self, user_id: i64, album_id: i64) -> StoreFuture<'_, ()>;

    /// Remove an album from the user's unpaid order, inside a serializable
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] on a concurrency abort or
    /// [`StoreError::Database`] for other failures.
    fn remove_album_from_order(&self, user_id: i64, album_id: i64) -> StoreFuture<'_, ()>;

    /// Fetch the user's unpaid order, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    fn get_unpaid_order(&self, user_id: i64) -> StoreFuture<'_, Option<Order>>;
}
