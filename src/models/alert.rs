use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    GeofenceExit,
    BatteryLow,
    CollarTampering,
    CollarCut,
    DeviceOffline,
    SpeedSuspect,
    /// Raised manually by an operator.
    Danger,
    /// Raised manually by an operator.
    Theft,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::GeofenceExit => "GEOFENCE_EXIT",
            AlertType::BatteryLow => "BATTERY_LOW",
            AlertType::CollarTampering => "COLLAR_TAMPERING",
            AlertType::CollarCut => "COLLAR_CUT",
            AlertType::DeviceOffline => "DEVICE_OFFLINE",
            AlertType::SpeedSuspect => "SPEED_SUSPECT",
            AlertType::Danger => "DANGER",
            AlertType::Theft => "THEFT",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GEOFENCE_EXIT" => Ok(AlertType::GeofenceExit),
            "BATTERY_LOW" => Ok(AlertType::BatteryLow),
            "COLLAR_TAMPERING" => Ok(AlertType::CollarTampering),
            "COLLAR_CUT" => Ok(AlertType::CollarCut),
            "DEVICE_OFFLINE" => Ok(AlertType::DeviceOffline),
            "SPEED_SUSPECT" => Ok(AlertType::SpeedSuspect),
            "DANGER" => Ok(AlertType::Danger),
            "THEFT" => Ok(AlertType::Theft),
            other => Err(format!("unknown alert type '{}'", other)),
        }
    }
}

/// Alert row. At most one unresolved alert may exist per
/// `(animal_id, alert_type)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub animal_id: Uuid,
    pub device_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl Alert {
    pub fn open(
        alert_type: AlertType,
        animal_id: Uuid,
        device_id: Option<Uuid>,
        owner_id: Uuid,
        raised_at: DateTime<Utc>,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            animal_id,
            device_id,
            owner_id,
            raised_at,
            resolved: false,
            resolved_at: None,
            message,
        }
    }

    pub fn resolve(&mut self, at: DateTime<Utc>, message: String) {
        self.resolved = true;
        self.resolved_at = Some(at);
        self.message = message;
    }

    pub fn to_event(&self) -> AlertEvent {
        AlertEvent {
            alert_id: self.id,
            animal_id: self.animal_id,
            device_id: self.device_id,
            alert_type: self.alert_type,
            message: self.message.clone(),
            raised_at: self.raised_at,
            resolved: self.resolved,
            resolved_at: self.resolved_at,
        }
    }
}

/// Notification streamed to subscribers when an alert opens or resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub animal_id: Uuid,
    pub device_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_sets_flag_timestamp_and_message() {
        let raised = Utc::now();
        let mut alert = Alert::open(
            AlertType::GeofenceExit,
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            raised,
            "out".to_string(),
        );
        let later = raised + chrono::Duration::minutes(3);
        alert.resolve(later, "back".to_string());

        assert!(alert.resolved);
        assert_eq!(alert.resolved_at, Some(later));
        assert_eq!(alert.message, "back");
        assert_eq!(alert.raised_at, raised);
    }

    #[test]
    fn event_serializes_type_in_wire_format() {
        let alert = Alert::open(
            AlertType::CollarCut,
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Uuid::new_v4(),
            Utc::now(),
            "cut".to_string(),
        );
        let json = serde_json::to_value(alert.to_event()).unwrap();
        assert_eq!(json["type"], "COLLAR_CUT");
        assert_eq!(json["resolved"], false);
        assert!(json["resolvedAt"].is_null());
        assert_eq!(json["alertId"], alert.id.to_string());
    }
}
