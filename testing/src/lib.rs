//! # Wavecart Testing
//!
//! In-memory doubles for the pipeline's two external collaborators:
//!
//! - [`MemoryBus`] — a broadcast-channel message bus implementing the
//!   `MessageBus` trait, with a raw-key publish hook for exercising the
//!   consumer loop's dedup guard
//! - [`MemoryStore`] — a mutex-guarded store implementing `UserStore` and
//!   `OrderStore` with the same atomicity the stored procedures provide
//!
//! Both are fast, deterministic, and safe to share behind an `Arc` across
//! concurrently running test tasks.

pub mod bus;
pub mod store;

pub use bus::MemoryBus;
pub use store::MemoryStore;
