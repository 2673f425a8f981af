//! # Wavecart Core
//!
//! Domain types and pipeline abstractions for the Wavecart storefront's
//! asynchronous commerce pipeline.
//!
//! The pipeline moves money-operation requests from the request path,
//! through the broker, into the settlement processor, and routes the
//! results back out to live client connections:
//!
//! ```text
//! request path ──► topic "money-operations" ──► settlement processor
//!                                                      │
//!                                              store mutation (Postgres)
//!                                                      │
//! live connection ◄── fan-out service ◄── topic "notifications"
//! ```
//!
//! This crate holds the pieces every service shares and nothing that does
//! I/O of its own:
//!
//! - [`bus`] — the [`bus::MessageBus`] trait, envelope and error types
//! - [`consumer`] — the polling consume loop with dedup and bounded dispatch
//! - [`dedup`] — the bounded seen-key window
//! - [`event`] — the tagged wire events ([`event::CommerceEvent`],
//!   [`event::OutcomeNotification`])
//! - [`model`] — shared domain types ([`model::Order`], [`model::Album`])
//! - [`store`] — the store traits the pipeline mutates state through

pub mod bus;
pub mod consumer;
pub mod dedup;
pub mod event;
pub mod model;
pub mod store;

pub use bus::{BusError, Envelope, MessageBus, MessageStream, topics};
pub use consumer::{ConsumeError, ConsumerLoop, HandlerError};
pub use dedup::DedupWindow;
pub use event::{CommerceEvent, EventError, OutcomeNotification};
pub use model::{Album, Order};
pub use store::{OrderStore, StoreError, StoreFuture, UserStore};
