use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use dotenvy::dotenv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Kafka,
    Mqtt,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Transport::Kafka),
            "mqtt" => Ok(Transport::Mqtt),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
    pub max_retries: u32,
    pub circuit_breaker_cooldown: u64,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    pub username: String,
    pub password: String,
    pub topic: String,
    pub qos: u8,
}

/// Thresholds used by the alert rules.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    /// Open BATTERY_LOW at or below this percentage.
    pub battery_low: u8,
    /// Resolve BATTERY_LOW at or above this percentage.
    pub battery_recovery: u8,
    /// Pressure at or below which the strap is considered cut.
    pub pressure_cut: f64,
    /// Pressure at or below which the strap is considered tampered with.
    pub pressure_tampering: f64,
    /// Metres per second; 18 m/s is about 65 km/h.
    pub speed_suspect_mps: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            battery_low: 20,
            battery_recovery: 25,
            pressure_cut: 0.2,
            pressure_tampering: 0.6,
            speed_suspect_mps: 18.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfflineSettings {
    /// Zero or negative disables the sweep.
    pub threshold: chrono::Duration,
    pub check_interval: Duration,
    pub initial_delay: Duration,
}

impl OfflineSettings {
    pub fn is_enabled(&self) -> bool {
        self.threshold > chrono::Duration::zero()
    }
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            threshold: chrono::Duration::minutes(5),
            check_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceSettings {
    pub flush_interval: Duration,
    /// Warning threshold only; buffering never blocks.
    pub soft_capacity: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            soft_capacity: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub transport: Transport,
    pub kafka: KafkaSettings,
    pub mqtt: MqttSettings,
    pub database_url: String,
    pub db_max_connections: u32,
    pub alerts: AlertSettings,
    pub offline: OfflineSettings,
    pub persistence: PersistenceSettings,
    pub push: PushSettings,
    pub realtime_channel_capacity: usize,
    pub log_level: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let transport = var_or("TELEMETRY_TRANSPORT", "kafka")
            .parse::<Transport>()
            .map_err(anyhow::Error::msg)?;

        let kafka = KafkaSettings {
            bootstrap_servers: var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            topic: var_or("KAFKA_TOPIC", "collar-telemetry"),
            group_id: var_or("KAFKA_GROUP_ID", "livestock-telemetry"),
            auto_offset_reset: var_or("KAFKA_AUTO_OFFSET_RESET", "latest"),
            sasl_mechanism: var_or("KAFKA_SASL_MECHANISM", "PLAIN"),
            username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            security_protocol: var_or("KAFKA_SECURITY_PROTOCOL", "PLAINTEXT"),
            max_retries: parse_or("KAFKA_MAX_RETRIES", 5),
            circuit_breaker_cooldown: parse_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300),
        };

        let mqtt = MqttSettings {
            host: var_or("MQTT_HOST", "localhost"),
            port: parse_or("MQTT_PORT", 1883),
            client_id_prefix: var_or("MQTT_CLIENT_ID_PREFIX", "livestock-telemetry"),
            username: env::var("MQTT_USERNAME").unwrap_or_default(),
            password: env::var("MQTT_PASSWORD").unwrap_or_default(),
            topic: var_or("MQTT_TOPIC", "collars/+/telemetry"),
            qos: parse_or("MQTT_QOS", 1),
        };

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "livestock");
        let db_user = var_or("DB_USER", "livestock");
        let db_pwd = var_or("DB_PWD", "livestock");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let defaults = AlertSettings::default();
        let alerts = AlertSettings {
            battery_low: parse_or("ALERT_BATTERY_LOW", defaults.battery_low),
            battery_recovery: parse_or("ALERT_BATTERY_RECOVERY", defaults.battery_recovery),
            pressure_cut: parse_or("ALERT_PRESSURE_CUT", defaults.pressure_cut),
            pressure_tampering: parse_or("ALERT_PRESSURE_TAMPERING", defaults.pressure_tampering),
            speed_suspect_mps: parse_or("ALERT_SPEED_SUSPECT_MPS", defaults.speed_suspect_mps),
        };

        let offline = OfflineSettings {
            threshold: chrono::Duration::seconds(parse_or("OFFLINE_THRESHOLD_SECS", 300)),
            check_interval: Duration::from_secs(parse_or("OFFLINE_CHECK_INTERVAL_SECS", 60)),
            initial_delay: Duration::from_secs(parse_or("OFFLINE_INITIAL_DELAY_SECS", 30)),
        };

        let persistence = PersistenceSettings {
            flush_interval: Duration::from_secs(parse_or("PERSISTENCE_FLUSH_INTERVAL_SECS", 30)),
            soft_capacity: parse_or("PERSISTENCE_MAX_ENTRIES", 5000),
        };

        let push = PushSettings {
            enabled: parse_or("PUSH_ENABLED", false),
        };

        let config = Self {
            transport,
            kafka,
            mqtt,
            database_url,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 20),
            alerts,
            offline,
            persistence,
            push,
            realtime_channel_capacity: parse_or("REALTIME_CHANNEL_CAPACITY", 1024),
            log_level: var_or("LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_alerts(&self.alerts)?;
        if self.offline.check_interval.is_zero() {
            bail!("OFFLINE_CHECK_INTERVAL_SECS must be positive");
        }
        if self.persistence.flush_interval.is_zero() {
            bail!("PERSISTENCE_FLUSH_INTERVAL_SECS must be positive");
        }
        if self.realtime_channel_capacity == 0 {
            bail!("REALTIME_CHANNEL_CAPACITY must be positive");
        }
        if self.mqtt.qos > 2 {
            bail!("MQTT_QOS must be 0, 1 or 2");
        }
        Ok(())
    }
}

pub fn validate_alerts(alerts: &AlertSettings) -> Result<()> {
    if alerts.battery_recovery <= alerts.battery_low {
        bail!(
            "battery recovery threshold ({}) must be above the low threshold ({})",
            alerts.battery_recovery,
            alerts.battery_low
        );
    }
    if alerts.battery_recovery > 100 {
        bail!("battery recovery threshold must be a percentage");
    }
    if !(alerts.pressure_cut < alerts.pressure_tampering) {
        bail!(
            "pressure cut threshold ({}) must be below the tampering threshold ({})",
            alerts.pressure_cut,
            alerts.pressure_tampering
        );
    }
    if !(alerts.speed_suspect_mps > 0.0) {
        bail!("suspicious speed threshold must be positive");
    }
    Ok(())
}
