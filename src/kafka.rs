use crate::config::KafkaSettings;
use crate::processor::ingestion::IngestionService;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn client_config(settings: &KafkaSettings) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &settings.bootstrap_servers)
        .set("group.id", &settings.group_id)
        .set("auto.offset.reset", &settings.auto_offset_reset)
        .set("security.protocol", &settings.security_protocol);

    // Credentials only apply to SASL_* protocols
    if settings.security_protocol.to_ascii_uppercase().starts_with("SASL") {
        client_config
            .set("sasl.mechanism", &settings.sasl_mechanism)
            .set("sasl.username", &settings.username)
            .set("sasl.password", &settings.password);
    }
    client_config
}

/// Consumes collar payloads from Kafka with a circuit breaker on
/// consecutive receive errors. Runs until the task is dropped.
pub async fn start_kafka_consumer(
    settings: &KafkaSettings,
    ingestion: Arc<IngestionService>,
) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", settings.topic);

    let consumer: StreamConsumer = client_config(settings).create()?;

    consumer.subscribe(&[&settings.topic])?;
    info!("Subscribed to topic: {}", settings.topic);

    let mut consecutive_failures = 0;
    let max_retries = settings.max_retries;
    let cooldown_duration = Duration::from_secs(settings.circuit_breaker_cooldown);

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, settings.circuit_breaker_cooldown
            );
            tokio::time::sleep(cooldown_duration).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        match consumer.recv().await {
            Ok(m) => {
                consecutive_failures = 0;

                let payload = match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka");
                        continue;
                    }
                    Some(p) => p.to_vec(),
                };

                // Process the message in a background task to not block the consumer loop
                let ingestion = ingestion.clone();
                tokio::spawn(async move {
                    ingestion.handle_message(&payload, None).await;
                });
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e, consecutive_failures, max_retries
                );

                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
