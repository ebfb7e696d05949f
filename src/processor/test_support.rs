//! Shared fixtures for the processor tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::alert_engine::TrackedAnimal;
use crate::geo::{GeoPoint, Geofence, Polygon};
use crate::models::animal::{Animal, Owner};
use crate::models::device::{CollarStatus, Device};
use crate::models::reading::{TelemetryReading, TransmissionStatus};
use crate::store::{MemoryAlertLedger, MemoryRegistry};

pub const IMEI: &str = "356938035643809";
pub const OWNER_PHONE: &str = "221770000001";

pub fn pasture() -> Geofence {
    Geofence {
        id: Uuid::new_v4(),
        name: Some("North pasture".to_string()),
        zone: Polygon::new(vec![
            GeoPoint::new(14.0, -17.0),
            GeoPoint::new(14.0, -16.0),
            GeoPoint::new(15.0, -16.0),
            GeoPoint::new(15.0, -17.0),
        ])
        .unwrap(),
    }
}

pub fn inside() -> GeoPoint {
    GeoPoint::new(14.5, -16.5)
}

pub fn outside() -> GeoPoint {
    GeoPoint::new(15.5, -16.5)
}

pub struct Farm {
    pub registry: Arc<MemoryRegistry>,
    pub ledger: Arc<MemoryAlertLedger>,
    pub device: Device,
    pub animal: Animal,
    pub owner: Owner,
}

impl Farm {
    pub fn tracked(&self) -> TrackedAnimal {
        TrackedAnimal {
            device: self.device.clone(),
            animal: self.animal.clone(),
            owner: Some(self.owner.clone()),
        }
    }

    pub fn reading(&self, at: DateTime<Utc>, position: GeoPoint) -> TelemetryReading {
        TelemetryReading {
            device_id: self.device.id,
            device_imei: self.device.imei.clone(),
            timestamp: at,
            position,
            speed: None,
            accel_x: None,
            accel_y: None,
            accel_z: None,
            pressure: None,
            battery_level: None,
            gsm_signal: None,
            transmission_status: TransmissionStatus::Sent,
            collar_status: None,
        }
    }
}

/// Bessie wears collar `IMEI` and grazes in the owner's pasture.
pub fn farm() -> Farm {
    farm_with_geofence(Some(pasture()))
}

pub fn farm_with_geofence(geofence: Option<Geofence>) -> Farm {
    let owner = Owner {
        id: Uuid::new_v4(),
        phone: Some(OWNER_PHONE.to_string()),
        home_position: Some(GeoPoint::new(14.5, -16.6)),
        geofence,
    };
    let device_id = Uuid::new_v4();
    let animal = Animal {
        id: Uuid::new_v4(),
        name: Some("Bessie".to_string()),
        species: Some("COW".to_string()),
        owner_id: owner.id,
        herd_id: None,
        device_id: Some(device_id),
        last_position: None,
        last_position_at: None,
        last_inside_geofence: None,
    };
    let device = Device {
        id: device_id,
        imei: IMEI.to_string(),
        collar_status: CollarStatus::Active,
        animal_id: Some(animal.id),
    };

    let registry = Arc::new(MemoryRegistry::new());
    registry.insert_owner(owner.clone());
    registry.insert_animal(animal.clone());
    registry.insert_device(device.clone());

    Farm {
        registry,
        ledger: Arc::new(MemoryAlertLedger::new()),
        device,
        animal,
        owner,
    }
}
