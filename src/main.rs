use std::sync::Arc;

use livestock_telemetry::config::{AppConfig, Transport};
use livestock_telemetry::db::{self, PgAlertLedger, PgPushTokens, PgRegistry, PgTelemetryStore};
use livestock_telemetry::dispatch::push::{LogPushTransport, PushNotifier};
use livestock_telemetry::dispatch::BroadcastDispatcher;
use livestock_telemetry::processor::{Backends, Pipeline};
use livestock_telemetry::{kafka, mqtt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!(
        "Starting Livestock Telemetry Service ({:?} transport)...",
        config.transport
    );

    // Init DB
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    db::ensure_schema(&pool).await?;
    info!("Connected to database");

    let ledger = Arc::new(PgAlertLedger::new(pool.clone()));
    let backends = Backends {
        registry: Arc::new(PgRegistry::new(pool.clone())),
        ledger: ledger.clone(),
        telemetry: Arc::new(PgTelemetryStore::new(pool.clone())),
    };

    // Realtime + push
    let mut dispatcher = BroadcastDispatcher::new(config.realtime_channel_capacity);
    if config.push.enabled {
        let notifier = PushNotifier::new(
            ledger,
            Arc::new(PgPushTokens::new(pool.clone())),
            Arc::new(LogPushTransport),
        );
        dispatcher = dispatcher.with_push(Arc::new(notifier));
        info!("Push notifications enabled");
    }
    let dispatcher = Arc::new(dispatcher);

    let mut realtime = dispatcher.subscribe();
    tokio::spawn(async move {
        loop {
            match realtime.recv().await {
                Ok(message) => debug!(
                    owner_key = %message.owner_key,
                    destination = %message.destination,
                    "Realtime message"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Realtime log subscriber lagged, {} messages skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let pipeline = Pipeline::new(
        backends,
        dispatcher,
        config.alerts.clone(),
        config.offline.clone(),
        &config.persistence,
    );

    // Background jobs
    tokio::spawn(pipeline.offline.clone().run());
    tokio::spawn(pipeline.buffer.clone().run(config.persistence.clone()));

    // Start consumer
    let ingestion = pipeline.ingestion.clone();
    let consumer = async {
        match config.transport {
            Transport::Kafka => kafka::start_kafka_consumer(&config.kafka, ingestion).await,
            Transport::Mqtt => mqtt::start_mqtt_client(&config.mqtt, ingestion).await,
        }
    };

    let result = tokio::select! {
        result = consumer => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    // Final flush so buffered readings survive a clean stop
    match pipeline.buffer.flush().await {
        Ok(rows) => info!("Final flush wrote {} readings", rows),
        Err(e) => error!("Final flush failed: {}", e),
    }

    if let Err(e) = &result {
        error!("Telemetry consumer stopped: {}", e);
    }
    result
}
