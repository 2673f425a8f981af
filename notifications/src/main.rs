//! Notifications service binary: consumes the notifications topic and
//! serves the live WebSocket endpoint.

use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use wavecart_core::bus::topics;
use wavecart_core::consumer::{ConsumerLoop, HandlerError};
use wavecart_core::dedup::DedupWindow;
use wavecart_kafka::KafkaBus;
use wavecart_notifications::config::Config;
use wavecart_notifications::connection::{self, ConnectionState};
use wavecart_notifications::{HttpAuthorizer, NotificationRegistry};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();
    tracing::info!(
        brokers = %config.brokers,
        bind_addr = %config.bind_addr,
        "starting notifications service"
    );

    let bus = Arc::new(
        KafkaBus::builder()
            .brokers(config.brokers.clone())
            .consumer_group(config.consumer_group.clone())
            .build()?,
    );
    let registry = Arc::new(NotificationRegistry::new());

    let consumer = ConsumerLoop::new(
        bus,
        vec![topics::NOTIFICATIONS.to_string()],
        DedupWindow::new(config.dedup_capacity),
    )
    .with_max_in_flight(config.max_in_flight);

    let fanout_registry = registry.clone();
    let fanout = tokio::spawn(async move {
        consumer
            .run_forever(
                move |payload: Vec<u8>| {
                    let registry = fanout_registry.clone();
                    async move { registry.route(&payload).map_err(HandlerError::from) }
                },
                || tracing::debug!("notification routed"),
                |err| tracing::error!(error = %err, "notification consumption failed"),
            )
            .await
    });

    let state = Arc::new(ConnectionState {
        registry,
        authorizer: Arc::new(HttpAuthorizer::new(config.authorization_url.clone())),
        mailbox_capacity: config.mailbox_capacity,
    });
    let app = Router::new()
        .route("/ws", get(connection::handle))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "WebSocket endpoint ready");

    tokio::select! {
        served = axum::serve(listener, app) => served?,
        consumed = fanout => consumed??,
    }

    Ok(())
}
