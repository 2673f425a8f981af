//! Domain types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A purchasable album as it appears inside an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    /// Catalog identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Unit price in store currency.
    pub price: f64,
}

/// A user's order: the in-progress cart while unpaid, a receipt once paid.
///
/// At most one unpaid order exists per user at any time. The order is
/// created implicitly by the first add-album call and retired when the
/// settlement processor marks it paid; its album set and total price are
/// immutable from that point on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Sum of the contained albums' prices.
    pub total_price: f64,
    /// Whether the order has been settled.
    pub is_paid: bool,
    /// Albums currently in the order.
    pub albums: Vec<Album>,
}

impl Order {
    /// Whether the order contains the given album.
    #[must_use]
    pub fn contains_album(&self, album_id: i64) -> bool {
        self.albums.iter().any(|album| album.id == album_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_albums(albums: Vec<Album>) -> Order {
        Order {
            id: 1,
            owner_id: 10,
            created_at: Utc::now(),
            total_price: albums.iter().map(|a| a.price).sum(),
            is_paid: false,
            albums,
        }
    }

    #[test]
    fn contains_album_matches_on_id() {
        let order = order_with_albums(vec![Album {
            id: 5,
            name: "Blue Train".to_string(),
            price: 9.99,
        }]);
        assert!(order.contains_album(5));
        assert!(!order.contains_album(6));
    }
}
