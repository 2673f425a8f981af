//! Fan-out service configuration, loaded from environment variables with
//! defaults suitable for local development.

use crate::connection::DEFAULT_MAILBOX_CAPACITY;
use std::env;
use wavecart_core::consumer::DEFAULT_MAX_IN_FLIGHT;
use wavecart_core::dedup::DEFAULT_DEDUP_CAPACITY;

/// Configuration for the notifications service binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Kafka broker addresses (comma-separated).
    pub brokers: String,
    /// Consumer group for the notifications subscription.
    pub consumer_group: String,
    /// Address to bind the WebSocket endpoint on.
    pub bind_addr: String,
    /// Authorization oracle endpoint.
    pub authorization_url: String,
    /// Mailbox depth per live connection.
    pub mailbox_capacity: usize,
    /// Seen-key window capacity for the dedup guard.
    pub dedup_capacity: usize,
    /// Cap on concurrently running fan-out handlers.
    pub max_in_flight: usize,
}

impl Config {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
            consumer_group: env_or("NOTIFICATIONS_CONSUMER_GROUP", "wavecart-notifications"),
            bind_addr: env_or("NOTIFICATIONS_BIND_ADDR", "0.0.0.0:8086"),
            authorization_url: env_or(
                "AUTHORIZATION_URL",
                "http://localhost:8081/authorize",
            ),
            mailbox_capacity: parse_or("NOTIFICATION_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY),
            dedup_capacity: parse_or("DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY),
            max_in_flight: parse_or("NOTIFICATIONS_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
