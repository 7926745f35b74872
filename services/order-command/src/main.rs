//! Order command service.
//!
//! Configuration:
//! - `KAFKA_BROKERS` (required), `KAFKA_USER`, `KAFKA_PASSWORD`,
//!   `TRUSTSTORE_ENABLED`, `TRUSTSTORE_PATH`, `TRUSTSTORE_PWD`
//! - `ORDER_PIPELINE_CONFIG`: application config (default
//!   `config/application.toml`)
//! - `METRICS_ADDR`: optional Prometheus listener
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::Context;
use order_command::{build_router, AppState, Config};
use order_pipeline_core::config::{timeouts, BrokerConfig};
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::event_bus::EventBus;
use order_pipeline_core::producer::CommandProducer;
use order_pipeline_redpanda::RedpandaEventBus;
use order_pipeline_runtime::metrics::MetricsServer;
use order_pipeline_web::shutdown_signal;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting order command service");

    let broker = match BrokerConfig::from_env() {
        Ok(broker) => broker,
        Err(e) => {
            error!(error = %e, "Broker configuration missing, refusing to start");
            return Err(e).context("loading broker configuration");
        },
    };
    let config = Config::from_env().context("loading application config")?;

    if let Some(mut metrics) = MetricsServer::from_env()? {
        metrics.start()?;
    }

    let bus = Arc::new(
        RedpandaEventBus::builder()
            .broker_config(&broker)
            .client_id(config.command.client_id.as_str())
            .build()
            .context("creating producer")?,
    );
    let producer = Arc::new(CommandProducer::new(
        bus.clone(),
        config.topics.orders.as_str(),
        Arc::new(SystemClock),
    ));

    let app = build_router(AppState::new(producer));

    let listener = tokio::net::TcpListener::bind(config.command.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.command.bind_addr))?;
    info!(
        address = %config.command.bind_addr,
        orders_topic = %config.topics.orders,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    if let Err(e) = bus.close(timeouts::PRODUCER_CLOSE_TIMEOUT).await {
        warn!(error = %e, "Producer did not flush before close timeout");
    }

    info!("Server stopped");
    Ok(())
}
