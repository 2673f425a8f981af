//! PostgreSQL store for the Wavecart pipeline.
//!
//! Implements the `wavecart-core` store traits over a `sqlx` connection
//! pool. Settlement and order mutations run inside transactions forced to
//! serializable isolation before the storefront's stored procedures are
//! invoked, so concurrent conflicting mutations abort instead of corrupting
//! the album set, total price, or balance.

pub mod store;

pub use store::PostgresStore;
