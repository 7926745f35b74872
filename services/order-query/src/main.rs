//! Order query service.
//!
//! Configuration:
//! - `KAFKA_BROKERS` (required), `KAFKA_USER`, `KAFKA_PASSWORD`,
//!   `TRUSTSTORE_ENABLED`, `TRUSTSTORE_PATH`, `TRUSTSTORE_PWD`
//! - `ORDER_PIPELINE_CONFIG`: application config (default
//!   `config/application.toml`)
//! - `METRICS_ADDR`: optional Prometheus listener
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::Context;
use order_pipeline_core::config::{timeouts, BrokerConfig};
use order_pipeline_core::environment::{Clock, SystemClock};
use order_pipeline_core::event_bus::EventBus;
use order_pipeline_projections::{
    InMemoryOrderViewStore, OrderProjection, QueryConsumer, QueryConsumerConfig,
};
use order_pipeline_redpanda::RedpandaEventBus;
use order_pipeline_runtime::metrics::MetricsServer;
use order_pipeline_web::shutdown_signal;
use order_query::{build_router, Config};
use std::sync::Arc;
use tokio::sync::oneshot;
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

    info!("Starting order query service");

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

    let instance = format!("{}-{}", std::process::id(), SystemClock.now_millis());
    let consumer_settings = config.query.consumer_settings(&instance);

    let bus = Arc::new(
        RedpandaEventBus::builder()
            .broker_config(&broker)
            .client_id(config.query.client_id.as_str())
            .consumer(consumer_settings.clone())
            .build()
            .context("creating broker client")?,
    );

    let store = Arc::new(InMemoryOrderViewStore::new());
    let (consumer, shutdown) = QueryConsumer::new(
        OrderProjection::new(Arc::clone(&store)),
        bus.clone(),
        QueryConsumerConfig::new(config.topics.orders.as_str(), config.topics.errors.as_str()),
        Arc::new(SystemClock),
    );

    // Fires when the consumer stops on its own so the HTTP server stops too
    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    let consumer_task = tokio::spawn(async move {
        let result = consumer.run().await;
        let _ = stopped_tx.send(());
        result
    });

    let listener = tokio::net::TcpListener::bind(config.query.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.query.bind_addr))?;
    info!(
        address = %config.query.bind_addr,
        orders_topic = %config.topics.orders,
        errors_topic = %config.topics.errors,
        group_id = %consumer_settings.group_id,
        "Server listening"
    );

    axum::serve(listener, build_router(store))
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => {},
                _ = stopped_rx => warn!("Query consumer stopped, shutting down HTTP server"),
            }
        })
        .await
        .context("serving HTTP")?;

    // The consumer may already have exited; a closed channel is fine
    let _ = shutdown.send(true);

    let outcome = match tokio::time::timeout(timeouts::TERMINATION_TIMEOUT, consumer_task).await {
        Ok(Ok(Ok(report))) => {
            info!(
                batches = report.batches,
                applied = report.applied,
                skipped = report.skipped,
                dead_lettered = report.dead_lettered,
                final_commit_ok = report.final_commit_ok,
                "Query consumer stopped"
            );
            Ok(())
        },
        Ok(Ok(Err(e))) => {
            error!(error = %e, "Query consumer failed");
            Err(anyhow::Error::new(e).context("running query consumer"))
        },
        Ok(Err(join_error)) => {
            error!(error = %join_error, "Query consumer task panicked");
            Err(anyhow::Error::new(join_error).context("joining query consumer"))
        },
        Err(_elapsed) => {
            warn!(
                timeout_secs = timeouts::TERMINATION_TIMEOUT.as_secs(),
                "Query consumer did not stop in time; uncommitted records will be redelivered"
            );
            Ok(())
        },
    };

    if let Err(e) = bus.close(timeouts::PRODUCER_CLOSE_TIMEOUT).await {
        warn!(error = %e, "Dead-letter producer did not flush before close timeout");
    }

    info!("Server stopped");
    outcome
}
