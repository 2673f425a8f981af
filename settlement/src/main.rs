//! Settlement service binary: consumes the money-operations topic and
//! settles each event against Postgres.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use wavecart_core::bus::topics;
use wavecart_core::consumer::{ConsumerLoop, HandlerError};
use wavecart_core::dedup::DedupWindow;
use wavecart_kafka::KafkaBus;
use wavecart_postgres::PostgresStore;
use wavecart_settlement::SettlementProcessor;
use wavecart_settlement::config::Config;

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
        consumer_group = %config.consumer_group,
        "starting settlement service"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    tracing::info!("database pool ready");

    let bus = Arc::new(
        KafkaBus::builder()
            .brokers(config.brokers.clone())
            .producer_id(config.producer_id)
            .consumer_group(config.consumer_group.clone())
            .build()?,
    );
    let store = Arc::new(PostgresStore::new(pool));
    let processor = Arc::new(SettlementProcessor::new(store, bus.clone()));

    let consumer = ConsumerLoop::new(
        bus,
        vec![topics::MONEY_OPERATIONS.to_string()],
        DedupWindow::new(config.dedup_capacity),
    )
    .with_max_in_flight(config.max_in_flight);

    consumer
        .run_forever(
            move |payload| {
                let processor = processor.clone();
                async move {
                    processor
                        .handle_event(payload)
                        .await
                        .map_err(HandlerError::from)
                }
            },
            || tracing::debug!("commerce event settled"),
            |err| tracing::error!(error = %err, "commerce event consumption failed"),
        )
        .await?;

    Ok(())
}
