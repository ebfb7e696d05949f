use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::alert::AlertType;
use super::device::CollarStatus;
use crate::geo::GeoPoint;

/// Broadcast to the owner each time an animal reports a new position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub animal_id: Uuid,
    pub animal_label: String,
    pub device_id: Uuid,
    pub device_imei: String,
    pub position: GeoPoint,
    pub speed: Option<f64>,
    pub battery_level: Option<u8>,
    pub gsm_signal: Option<i32>,
    pub collar_status: CollarStatus,
    pub timestamp: DateTime<Utc>,
    pub inside_geofence: bool,
    pub geofence_id: Option<Uuid>,
    pub geofence_name: Option<String>,
    /// Every alert type currently open for the animal, not only the ones
    /// that changed with this reading.
    pub active_alerts: Vec<AlertType>,
}
