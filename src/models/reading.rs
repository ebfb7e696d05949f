use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::CollarStatus;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransmissionStatus {
    #[default]
    Sent,
    Pending,
    Failed,
}

impl TransmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmissionStatus::Sent => "SENT",
            TransmissionStatus::Pending => "PENDING",
            TransmissionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SENT" => Ok(TransmissionStatus::Sent),
            "PENDING" => Ok(TransmissionStatus::Pending),
            "FAILED" => Ok(TransmissionStatus::Failed),
            other => Err(format!("unknown transmission status '{}'", other)),
        }
    }
}

/// A normalized telemetry sample, bound to a known device.
///
/// Optional sensors stay `None` when the collar did not report them; the
/// rules treat a missing value as "do not evaluate".
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub device_id: Uuid,
    pub device_imei: String,
    pub timestamp: DateTime<Utc>,
    pub position: GeoPoint,
    /// Metres per second.
    pub speed: Option<f64>,
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    /// Strap pressure on a 0..1 scale.
    pub pressure: Option<f64>,
    pub battery_level: Option<u8>,
    pub gsm_signal: Option<i32>,
    pub transmission_status: TransmissionStatus,
    /// Status reported by the collar itself, if any.
    pub collar_status: Option<CollarStatus>,
}
