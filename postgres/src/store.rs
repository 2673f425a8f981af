//! Store trait implementations backed by the storefront schema.
//!
//! Balance, order, and album state live in the `public` schema; the
//! invariant-bearing mutations (`pay_for_order`,
//! `add_album_to_user_order`, `delete_album_from_user_order`) are stored
//! procedures, and this module's job is to call them under serializable
//! isolation and translate the failure codes into the
//! [`StoreError`] taxonomy.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use wavecart_core::model::{Album, Order};
use wavecart_core::store::{OrderStore, StoreError, StoreFuture, UserStore};

const UPDATE_BALANCE_SQL: &str = r"
    UPDATE public.users
    SET balance = balance + ($1)
    WHERE id = $2;
";

const CALL_PAY_FOR_ORDER_SQL: &str = r"CALL pay_for_order($1, $2);";

const CALL_ADD_ALBUM_SQL: &str = r"CALL add_album_to_user_order($1, $2);";

const CALL_REMOVE_ALBUM_SQL: &str = r"CALL delete_album_from_user_order($1, $2);";

const SELECT_UNPAID_ORDER_SQL: &str = r"
    SELECT
        o.id,
        o.user_id,
        o.date,
        o.total_price,
        o.is_paid,
        a.id AS album_id,
        a.name AS album_name,
        a.price AS album_price
    FROM public.orders AS o
    LEFT JOIN public.order_items AS oi ON oi.order_id = o.id
    LEFT JOIN public.albums AS a ON oi.album_id = a.id
    WHERE o.user_id = $1 AND o.is_paid = FALSE
    ORDER BY o.id, a.id;
";

/// `PostgreSQL`-backed implementation of the pipeline's store traits.
///
/// Holds a `sqlx` pool; cheap to clone-by-`Arc` across the services.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run a stored-procedure call inside a transaction forced to
    /// serializable isolation. The transaction rolls back on any error
    /// (dropping an uncommitted `sqlx` transaction rolls it back).
    async fn call_serializable(
        &self,
        sql: &str,
        user_id: i64,
        entity_id: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE;")
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        sqlx::query(sql)
            .bind(user_id)
            .bind(entity_id)
            .execute(&mut *tx)
            .await
            .map_err(map_procedure_error)?;

        tx.commit().await.map_err(map_procedure_error)?;
        Ok(())
    }
}

impl UserStore for PostgresStore {
    fn change_balance(&self, user_id: i64, amount: f64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(UPDATE_BALANCE_SQL)
                .bind(amount)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(map_db_error)?;

            tracing::debug!(user_id = user_id, amount = amount, "balance changed");
            Ok(())
        })
    }

    fn pay_for_order(&self, user_id: i64, order_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = self
                .call_serializable(CALL_PAY_FOR_ORDER_SQL, user_id, order_id)
                .await;

            match &result {
                Ok(()) => {
                    tracing::debug!(user_id = user_id, order_id = order_id, "order paid");
                    metrics::counter!("store.pay_for_order.paid").increment(1);
                }
                Err(StoreError::Serialization) => {
                    metrics::counter!("store.pay_for_order.serialization_conflict")
                        .increment(1);
                }
                Err(_) => {
                    metrics::counter!("store.pay_for_order.rejected").increment(1);
                }
            }

            result
        })
    }
}

impl OrderStore for PostgresStore {
    fn add_album_to_order(&self, user_id: i64, album_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(self.call_serializable(CALL_ADD_ALBUM_SQL, user_id, album_id))
    }

    fn remove_album_from_order(&self, user_id: i64, album_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(self.call_serializable(CALL_REMOVE_ALBUM_SQL, user_id, album_id))
    }

    fn get_unpaid_order(&self, user_id: i64) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let rows = sqlx::query(SELECT_UNPAID_ORDER_SQL)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_error)?;

            let mut parsed = Vec::with_capacity(rows.len());
            for row in &rows {
                parsed.push(parse_order_row(row)?);
            }

            Ok(fold_order_rows(parsed))
        })
    }
}

/// One row of the unpaid-order query: order columns plus an optional album
/// (absent for an order with no items yet).
struct OrderRow {
    order_id: i64,
    user_id: i64,
    created_at: DateTime<Utc>,
    total_price: f64,
    is_paid: bool,
    album: Option<Album>,
}

fn parse_order_row(row: &sqlx::postgres::PgRow) -> Result<OrderRow, StoreError> {
    let album_id: Option<i64> = row.try_get("album_id").map_err(map_db_error)?;
    let album = match album_id {
        Some(id) => Some(Album {
            id,
            name: row.try_get("album_name").map_err(map_db_error)?,
            price: row.try_get("album_price").map_err(map_db_error)?,
        }),
        None => None,
    };

    Ok(OrderRow {
        order_id: row.try_get("id").map_err(map_db_error)?,
        user_id: row.try_get("user_id").map_err(map_db_error)?,
        created_at: row.try_get("date").map_err(map_db_error)?,
        total_price: row.try_get("total_price").map_err(map_db_error)?,
        is_paid: row.try_get("is_paid").map_err(map_db_error)?,
        album,
    })
}

/// Collapse the joined rows into the single unpaid order, if any. The read
/// path selects unpaid-only, so all rows belong to one order.
fn fold_order_rows(rows: Vec<OrderRow>) -> Option<Order> {
    let mut order: Option<Order> = None;

    for row in rows {
        let entry = order.get_or_insert_with(|| Order {
            id: row.order_id,
            owner_id: row.user_id,
            created_at: row.created_at,
            total_price: row.total_price,
            is_paid: row.is_paid,
            albums: Vec::new(),
        });
        if let Some(album) = row.album {
            entry.albums.push(album);
        }
    }

    order
}

/// Map a driver error that carries no domain meaning.
fn map_db_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Map an error from a stored-procedure call or its commit.
///
/// `40001` is the serialization-failure class under serializable isolation;
/// `P0001` is `raise_exception`, which the storefront procedures use for
/// domain rejections (insufficient balance, missing or already-paid order).
fn map_procedure_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("40001") => return StoreError::Serialization,
            Some("P0001") => {
                let message = db.message().to_ascii_lowercase();
                if message.contains("insufficient") {
                    return StoreError::InsufficientFunds;
                }
                if message.contains("order") {
                    return StoreError::OrderNotFound;
                }
                return StoreError::Database(db.message().to_string());
            }
            _ => {}
        }
    }
    StoreError::Database(err.to_string())
}
