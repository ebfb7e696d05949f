//! Realtime fan-out of positions and alerts to owners.
//!
//! Messages go out on a broadcast channel; the websocket layer that
//! subscribes to it lives outside this service.

use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::alert::AlertEvent;
use crate::models::position::PositionUpdate;

pub mod push;

use push::PushNotifier;

pub const ANIMALS_QUEUE: &str = "/queue/animals";
pub const ALERTS_QUEUE: &str = "/queue/alerts";

/// Fire-and-forget sink for realtime updates. Implementations must not
/// block and must swallow their own failures.
pub trait RealtimeDispatch: Send + Sync {
    fn publish_position(&self, owner_key: &str, update: &PositionUpdate);

    fn publish_alert(&self, owner_key: &str, event: &AlertEvent);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundPayload {
    Position(PositionUpdate),
    Alert(AlertEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub owner_key: String,
    pub destination: String,
    pub payload: OutboundPayload,
}

pub struct BroadcastDispatcher {
    sender: broadcast::Sender<OutboundMessage>,
    push: Option<Arc<PushNotifier>>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, push: None }
    }

    pub fn with_push(mut self, notifier: Arc<PushNotifier>) -> Self {
        self.push = Some(notifier);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.sender.subscribe()
    }

    fn send(&self, owner_key: &str, destination: String, payload: OutboundPayload) {
        let message = OutboundMessage {
            owner_key: owner_key.to_string(),
            destination,
            payload,
        };
        if self.sender.send(message).is_err() {
            debug!(owner_key, "No realtime subscribers, message dropped");
        }
    }

    fn spawn_push(&self, event: &AlertEvent) {
        let Some(notifier) = self.push.clone() else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!(alert_id = %event.alert_id, "No runtime available for push notification");
            return;
        };
        let event = event.clone();
        handle.spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(alert_id = %event.alert_id, "Push notification failed: {}", e);
            }
        });
    }
}

impl RealtimeDispatch for BroadcastDispatcher {
    fn publish_position(&self, owner_key: &str, update: &PositionUpdate) {
        let owner_key = owner_key.trim();
        if owner_key.is_empty() {
            return;
        }
        self.send(
            owner_key,
            ANIMALS_QUEUE.to_string(),
            OutboundPayload::Position(update.clone()),
        );
        self.send(
            owner_key,
            format!("{}/{}", ANIMALS_QUEUE, update.animal_id),
            OutboundPayload::Position(update.clone()),
        );
    }

    fn publish_alert(&self, owner_key: &str, event: &AlertEvent) {
        let owner_key = owner_key.trim();
        if owner_key.is_empty() {
            return;
        }
        self.send(
            owner_key,
            ALERTS_QUEUE.to_string(),
            OutboundPayload::Alert(event.clone()),
        );
        self.send(
            owner_key,
            format!("{}/{}/alerts", ANIMALS_QUEUE, event.animal_id),
            OutboundPayload::Alert(event.clone()),
        );
        self.spawn_push(event);
    }
}
