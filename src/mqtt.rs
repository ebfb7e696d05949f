use crate::config::MqttSettings;
use crate::processor::ingestion::IngestionService;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn options(settings: &MqttSettings) -> MqttOptions {
    let client_id = format!("{}-{}", settings.client_id_prefix, Uuid::new_v4());
    let mut mqttoptions = MqttOptions::new(client_id, &settings.host, settings.port);
    mqttoptions.set_keep_alive(Duration::from_secs(5));
    if !settings.username.is_empty() {
        mqttoptions.set_credentials(&settings.username, &settings.password);
    }
    mqttoptions
}

/// Subscribes to the collar topic filter and ingests every publish in
/// its own task. Reconnects forever.
pub async fn start_mqtt_client(
    settings: &MqttSettings,
    ingestion: Arc<IngestionService>,
) -> anyhow::Result<()> {
    let (client, mut eventloop) = AsyncClient::new(options(settings), 100);

    client.subscribe(&settings.topic, qos(settings.qos)).await?;
    info!("Subscribed to {}", settings.topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => match notification {
                Event::Incoming(Packet::Publish(publish)) => {
                    let ingestion = ingestion.clone();
                    tokio::spawn(async move {
                        ingestion
                            .handle_message(&publish.payload, Some(&publish.topic))
                            .await;
                    });
                }
                Event::Incoming(Packet::ConnAck(_)) => {
                    info!("MQTT connected to {}:{}", settings.host, settings.port);
                }
                Event::Incoming(Packet::SubAck(_)) => {
                    info!("Subscription confirmed!");
                }
                _ => {}
            },
            Err(e) => {
                error!("MQTT Connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels_map_with_at_least_once_fallback() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
        assert_eq!(qos(7), QoS::AtLeastOnce);
    }

    #[test]
    fn client_id_uses_prefix() {
        let settings = MqttSettings {
            host: "broker".to_string(),
            port: 1883,
            client_id_prefix: "collars".to_string(),
            username: String::new(),
            password: String::new(),
            topic: "collars/+/telemetry".to_string(),
            qos: 1,
        };
        let opts = options(&settings);
        assert!(opts.client_id().starts_with("collars-"));
        assert_eq!(opts.broker_address(), ("broker".to_string(), 1883));
    }
}
