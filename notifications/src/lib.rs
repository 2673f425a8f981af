//! Notification fan-out service.
//!
//! Consumes outcome notifications from the broker and forwards each to the
//! currently registered live connection for its target user, if any.
//! Delivery is at-most-once with no persistence or replay: a user with no
//! live connection simply misses the notification.
//!
//! - [`registry`] — the user → mailbox map and best-effort delivery
//! - [`connection`] — the per-connection WebSocket lifecycle
//! - [`auth`] — the authorization oracle consulted once per connection
//! - [`config`] — environment-backed service configuration

pub mod auth;
pub mod config;
pub mod connection;
pub mod registry;

pub use auth::{AuthError, Authorizer, Claims, HttpAuthorizer};
pub use connection::{ConnectionState, NotificationFrame, SubscribeRequest};
pub use registry::NotificationRegistry;
