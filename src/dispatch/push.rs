//! Push notifications for alerts worth waking a phone for.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PushError;
use crate::models::alert::{AlertEvent, AlertType};
use crate::store::{AlertLedger, PushTokenStore};

const PUSH_WORTHY: [AlertType; 7] = [
    AlertType::CollarCut,
    AlertType::GeofenceExit,
    AlertType::CollarTampering,
    AlertType::DeviceOffline,
    AlertType::SpeedSuspect,
    AlertType::Danger,
    AlertType::Theft,
];

pub fn is_push_worthy(alert_type: AlertType) -> bool {
    PUSH_WORTHY.contains(&alert_type)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn for_alert(event: &AlertEvent) -> Self {
        let title = match event.alert_type {
            AlertType::CollarCut => "Theft alert",
            AlertType::CollarTampering => "Suspected theft",
            AlertType::DeviceOffline => "Tracker offline",
            AlertType::GeofenceExit => "Animal out of zone",
            AlertType::SpeedSuspect => "Suspicious speed",
            AlertType::Theft => "Theft",
            AlertType::Danger => "Danger",
            AlertType::BatteryLow => "Alert",
        };

        let mut data = BTreeMap::new();
        data.insert("alertId".to_string(), event.alert_id.to_string());
        data.insert("animalId".to_string(), event.animal_id.to_string());
        data.insert(
            "deviceId".to_string(),
            event.device_id.map(|id| id.to_string()).unwrap_or_default(),
        );
        data.insert("type".to_string(), event.alert_type.to_string());
        data.insert("ts".to_string(), event.raised_at.to_rfc3339());

        let body = if event.message.trim().is_empty() {
            "New alert".to_string()
        } else {
            event.message.clone()
        };

        Self {
            title: title.to_string(),
            body,
            data,
        }
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, message: &PushMessage, tokens: &[String]) -> Result<(), PushError>;
}

/// Logs the message instead of calling a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn send(&self, message: &PushMessage, tokens: &[String]) -> Result<(), PushError> {
        info!(
            title = %message.title,
            tokens = tokens.len(),
            alert_id = message.data.get("alertId").map(String::as_str).unwrap_or(""),
            "Push notification: {}",
            message.body
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Sent { tokens: usize },
    Skipped(&'static str),
}

pub struct PushNotifier {
    ledger: Arc<dyn AlertLedger>,
    tokens: Arc<dyn PushTokenStore>,
    transport: Arc<dyn PushTransport>,
}

impl PushNotifier {
    pub fn new(
        ledger: Arc<dyn AlertLedger>,
        tokens: Arc<dyn PushTokenStore>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            ledger,
            tokens,
            transport,
        }
    }

    pub async fn notify(&self, event: &AlertEvent) -> Result<PushOutcome, PushError> {
        if event.resolved {
            return Ok(PushOutcome::Skipped("resolved"));
        }
        if !is_push_worthy(event.alert_type) {
            return Ok(PushOutcome::Skipped("not push-worthy"));
        }

        let Some(alert) = self.ledger.find_by_id(event.alert_id).await? else {
            debug!(alert_id = %event.alert_id, "Push skipped: alert not found");
            return Ok(PushOutcome::Skipped("unknown alert"));
        };

        let tokens = distinct_tokens(self.tokens.tokens_for_owner(alert.owner_id).await?);
        if tokens.is_empty() {
            debug!(
                owner_id = %alert.owner_id,
                alert_id = %event.alert_id,
                "Push skipped: no registered tokens"
            );
            return Ok(PushOutcome::Skipped("no tokens"));
        }

        let message = PushMessage::for_alert(event);
        self.transport.send(&message, &tokens).await?;
        Ok(PushOutcome::Sent {
            tokens: tokens.len(),
        })
    }
}

fn distinct_tokens(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
