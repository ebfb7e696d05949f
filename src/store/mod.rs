//! Backends the pipeline talks to.
//!
//! Each trait has an in-memory implementation in [`memory`] and a
//! Postgres one in [`crate::db`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::geo::GeoPoint;
use crate::models::alert::{Alert, AlertType};
use crate::models::animal::{Animal, Owner};
use crate::models::device::{CollarStatus, Device};
use crate::models::reading::TelemetryReading;

pub mod memory;

pub use memory::{MemoryAlertLedger, MemoryPushTokens, MemoryRegistry, MemoryTelemetryStore};

/// Durable alert rows.
///
/// `save` inserts or updates by id and must refuse a second unresolved
/// alert for the same `(animal, type)` with [`StoreError::Conflict`].
#[async_trait]
pub trait AlertLedger: Send + Sync {
    async fn find_open_alert(
        &self,
        animal_id: Uuid,
        alert_type: AlertType,
    ) -> Result<Option<Alert>, StoreError>;

    async fn save(&self, alert: Alert) -> Result<Alert, StoreError>;

    async fn list_open_alerts(&self, animal_id: Uuid) -> Result<Vec<Alert>, StoreError>;

    async fn find_by_id(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError>;
}

/// Devices, animals and owners as seen by the pipeline.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn find_device_by_imei(&self, imei: &str) -> Result<Option<Device>, StoreError>;

    async fn find_device(&self, device_id: Uuid) -> Result<Option<Device>, StoreError>;

    async fn update_collar_status(
        &self,
        device_id: Uuid,
        status: CollarStatus,
    ) -> Result<(), StoreError>;

    async fn find_animal(&self, animal_id: Uuid) -> Result<Option<Animal>, StoreError>;

    async fn find_owner(&self, owner_id: Uuid) -> Result<Option<Owner>, StoreError>;

    async fn record_position(
        &self,
        animal_id: Uuid,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_geofence_state(&self, animal_id: Uuid, inside: bool) -> Result<(), StoreError>;

    /// Animals with a collar whose last reading is older than `cutoff`.
    /// Animals that never reported are not returned.
    async fn find_stale_animals(&self, cutoff: DateTime<Utc>) -> Result<Vec<Animal>, StoreError>;
}

/// Raw telemetry history.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn save_batch(&self, readings: &[TelemetryReading]) -> Result<(), StoreError>;
}

/// Push tokens registered by owners' phones.
#[async_trait]
pub trait PushTokenStore: Send + Sync {
    async fn tokens_for_owner(&self, owner_id: Uuid) -> Result<Vec<String>, StoreError>;
}
