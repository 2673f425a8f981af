//! In-memory store with the stored procedures' semantics.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use wavecart_core::model::{Album, Order};
use wavecart_core::store::{OrderStore, StoreError, StoreFuture, UserStore};

#[derive(Debug, Default)]
struct State {
    balances: HashMap<i64, f64>,
    orders: HashMap<i64, Order>,
    albums: HashMap<i64, Album>,
    next_order_id: i64,
}

/// In-memory [`UserStore`] + [`OrderStore`] for tests.
///
/// Every operation runs under one mutex, which gives each call the same
/// atomicity the stored procedures get from their serializable
/// transactions: a settlement either applies completely (balance decrement
/// plus paid flag) or not at all, and concurrent order mutations serialize.
///
/// Seed state with the `with_*` builders, then inspect it afterwards with
/// [`MemoryStore::balance`] and [`MemoryStore::order`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user with a starting balance.
    #[must_use]
    pub fn with_user(self, user_id: i64, balance: f64) -> Self {
        self.lock().balances.insert(user_id, balance);
        self
    }

    /// Seed the album catalog.
    #[must_use]
    pub fn with_album(self, album: Album) -> Self {
        self.lock().albums.insert(album.id, album);
        self
    }

    /// Seed an existing order (paid or unpaid).
    #[must_use]
    pub fn with_order(self, order: Order) -> Self {
        {
            let mut state = self.lock();
            state.next_order_id = state.next_order_id.max(order.id);
            state.orders.insert(order.id, order);
        }
        self
    }

    /// Current balance for the user, if seeded.
    #[must_use]
    pub fn balance(&self, user_id: i64) -> Option<f64> {
        self.lock().balances.get(&user_id).copied()
    }

    /// Snapshot of an order.
    #[must_use]
    pub fn order(&self, order_id: i64) -> Option<Order> {
        self.lock().orders.get(&order_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UserStore for MemoryStore {
    fn change_balance(&self, user_id: i64, amount: f64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            // Mirrors the SQL UPDATE: an unknown user affects zero rows and
            // is not an error.
            if let Some(balance) = self.lock().balances.get_mut(&user_id) {
                *balance += amount;
            }
            Ok(())
        })
    }

    fn pay_for_order(&self, user_id: i64, order_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();

            let (owner_id, is_paid, total) = match state.orders.get(&order_id) {
                Some(order) => (order.owner_id, order.is_paid, order.total_price),
                None => return Err(StoreError::OrderNotFound),
            };
            if owner_id != user_id || is_paid {
                return Err(StoreError::OrderNotFound);
            }

            let Some(balance) = state.balances.get_mut(&user_id) else {
                return Err(StoreError::Database(format!("no such user: {user_id}")));
            };
            if *balance < total {
                return Err(StoreError::InsufficientFunds);
            }

            *balance -= total;
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.is_paid = true;
            }
            Ok(())
        })
    }
}

impl OrderStore for MemoryStore {
    fn add_album_to_order(&self, user_id: i64, album_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();

            let Some(album) = state.albums.get(&album_id).cloned() else {
                return Err(StoreError::Database(format!("no such album: {album_id}")));
            };

            let unpaid_id = state
                .orders
                .values()
                .find(|order| order.owner_id == user_id && !order.is_paid)
                .map(|order| order.id);

            if let Some(id) = unpaid_id {
                if let Some(order) = state.orders.get_mut(&id) {
                    order.total_price += album.price;
                    order.albums.push(album);
                    return Ok(());
                }
            }

            let id = state.next_order_id + 1;
            state.next_order_id = id;
            state.orders.insert(
                id,
                Order {
                    id,
                    owner_id: user_id,
                    created_at: Utc::now(),
                    total_price: album.price,
                    is_paid: false,
                    albums: vec![album],
                },
            );
            Ok(())
        })
    }

    fn remove_album_from_order(&self, user_id: i64, album_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();

            // Mirrors the SQL DELETE: no unpaid order or no matching item
            // affects zero rows and is not an error.
            if let Some(order) = state
                .orders
                .values_mut()
                .find(|order| order.owner_id == user_id && !order.is_paid)
            {
                if let Some(index) = order.albums.iter().position(|a| a.id == album_id) {
                    let removed = order.albums.remove(index);
                    order.total_price -= removed.price;
                }
            }
            Ok(())
        })
    }

    fn get_unpaid_order(&self, user_id: i64) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .orders
                .values()
                .find(|order| order.owner_id == user_id && !order.is_paid)
                .cloned())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn unpaid_order(id: i64, owner_id: i64, total: f64) -> Order {
        Order {
            id,
            owner_id,
            created_at: Utc::now(),
            total_price: total,
            is_paid: false,
            albums: Vec::new(),
        }
    }

    #[tokio::test]
    async fn settlement_applies_atomically() {
        let store = MemoryStore::new()
            .with_user(42, 20.0)
            .with_order(unpaid_order(7, 42, 15.0));

        store.pay_for_order(42, 7).await.unwrap();

        assert!((store.balance(42).unwrap() - 5.0).abs() < f64::EPSILON);
        assert!(store.order(7).unwrap().is_paid);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_state_unchanged() {
        let store = MemoryStore::new()
            .with_user(42, 10.0)
            .with_order(unpaid_order(7, 42, 15.0));

        let err = store.pay_for_order(42, 7).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds));
        assert!((store.balance(42).unwrap() - 10.0).abs() < f64::EPSILON);
        assert!(!store.order(7).unwrap().is_paid);
    }

    #[tokio::test]
    async fn paying_someone_elses_order_is_not_found() {
        let store = MemoryStore::new()
            .with_user(42, 100.0)
            .with_order(unpaid_order(7, 43, 15.0));

        let err = store.pay_for_order(42, 7).await.unwrap_err();
        assert!(matches!(err, StoreError::OrderNotFound));
    }

    #[tokio::test]
    async fn paying_twice_is_not_found_the_second_time() {
        let store = MemoryStore::new()
            .with_user(42, 40.0)
            .with_order(unpaid_order(7, 42, 15.0));

        store.pay_for_order(42, 7).await.unwrap();
        let err = store.pay_for_order(42, 7).await.unwrap_err();
        assert!(matches!(err, StoreError::OrderNotFound));
        assert!((store.balance(42).unwrap() - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn first_add_creates_an_order_with_a_fresh_id() {
        let store = MemoryStore::new().with_album(Album {
            id: 1,
            name: "Nevermind".to_string(),
            price: 8.0,
        });

        store.add_album_to_order(5, 1).await.unwrap();

        let order = store.get_unpaid_order(5).await.unwrap().unwrap();
        assert_eq!(order.owner_id, 5);
        assert!((order.total_price - 8.0).abs() < f64::EPSILON);
    }
}
