//! In-process backends for tests and local runs without Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AlertLedger, PushTokenStore, Registry, TelemetryStore};
use crate::error::StoreError;
use crate::geo::GeoPoint;
use crate::models::alert::{Alert, AlertType};
use crate::models::animal::{Animal, Owner};
use crate::models::device::{CollarStatus, Device};
use crate::models::reading::TelemetryReading;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryAlertLedger {
    alerts: RwLock<HashMap<Uuid, Alert>>,
    fail_writes: AtomicBool,
}

impl MemoryAlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = read(&self.alerts).values().cloned().collect();
        alerts.sort_by_key(|a| a.raised_at);
        alerts
    }

    pub fn for_animal(&self, animal_id: Uuid, alert_type: AlertType) -> Vec<Alert> {
        self.all()
            .into_iter()
            .filter(|a| a.animal_id == animal_id && a.alert_type == alert_type)
            .collect()
    }
}

#[async_trait]
impl AlertLedger for MemoryAlertLedger {
    async fn find_open_alert(
        &self,
        animal_id: Uuid,
        alert_type: AlertType,
    ) -> Result<Option<Alert>, StoreError> {
        Ok(read(&self.alerts)
            .values()
            .filter(|a| a.animal_id == animal_id && a.alert_type == alert_type && !a.resolved)
            .max_by_key(|a| a.raised_at)
            .cloned())
    }

    async fn save(&self, alert: Alert) -> Result<Alert, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger writes disabled".to_string()));
        }

        let mut alerts = write(&self.alerts);
        if !alert.resolved {
            let duplicate = alerts.values().any(|other| {
                other.id != alert.id
                    && !other.resolved
                    && other.animal_id == alert.animal_id
                    && other.alert_type == alert.alert_type
            });
            if duplicate {
                return Err(StoreError::Conflict {
                    animal_id: alert.animal_id,
                    alert_type: alert.alert_type,
                });
            }
        }
        alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn list_open_alerts(&self, animal_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        Ok(read(&self.alerts)
            .values()
            .filter(|a| a.animal_id == animal_id && !a.resolved)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError> {
        Ok(read(&self.alerts).get(&alert_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<Uuid, Device>>,
    animals: RwLock<HashMap<Uuid, Animal>>,
    owners: RwLock<HashMap<Uuid, Owner>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, device: Device) {
        write(&self.devices).insert(device.id, device);
    }

    pub fn insert_animal(&self, animal: Animal) {
        write(&self.animals).insert(animal.id, animal);
    }

    pub fn insert_owner(&self, owner: Owner) {
        write(&self.owners).insert(owner.id, owner);
    }

    pub fn animal(&self, animal_id: Uuid) -> Option<Animal> {
        read(&self.animals).get(&animal_id).cloned()
    }

    pub fn device(&self, device_id: Uuid) -> Option<Device> {
        read(&self.devices).get(&device_id).cloned()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn find_device_by_imei(&self, imei: &str) -> Result<Option<Device>, StoreError> {
        Ok(read(&self.devices).values().find(|d| d.imei == imei).cloned())
    }

    async fn find_device(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        Ok(self.device(device_id))
    }

    async fn update_collar_status(
        &self,
        device_id: Uuid,
        status: CollarStatus,
    ) -> Result<(), StoreError> {
        if let Some(device) = write(&self.devices).get_mut(&device_id) {
            device.collar_status = status;
        }
        Ok(())
    }

    async fn find_animal(&self, animal_id: Uuid) -> Result<Option<Animal>, StoreError> {
        Ok(self.animal(animal_id))
    }

    async fn find_owner(&self, owner_id: Uuid) -> Result<Option<Owner>, StoreError> {
        Ok(read(&self.owners).get(&owner_id).cloned())
    }

    async fn record_position(
        &self,
        animal_id: Uuid,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(animal) = write(&self.animals).get_mut(&animal_id) {
            if !animal.is_out_of_order(at) {
                animal.last_position = Some(position);
                animal.last_position_at = Some(at);
            }
        }
        Ok(())
    }

    async fn record_geofence_state(&self, animal_id: Uuid, inside: bool) -> Result<(), StoreError> {
        if let Some(animal) = write(&self.animals).get_mut(&animal_id) {
            animal.last_inside_geofence = Some(inside);
        }
        Ok(())
    }

    async fn find_stale_animals(&self, cutoff: DateTime<Utc>) -> Result<Vec<Animal>, StoreError> {
        Ok(read(&self.animals)
            .values()
            .filter(|a| a.device_id.is_some())
            .filter(|a| a.last_position_at.map_or(false, |at| at < cutoff))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    batches: RwLock<Vec<Vec<TelemetryReading>>>,
    fail_next: AtomicBool,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `save_batch` call fails once.
    pub fn fail_next_batch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<TelemetryReading>> {
        read(&self.batches).clone()
    }

    pub fn rows(&self) -> Vec<TelemetryReading> {
        read(&self.batches).iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn save_batch(&self, readings: &[TelemetryReading]) -> Result<(), StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("telemetry store offline".to_string()));
        }
        write(&self.batches).push(readings.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPushTokens {
    tokens: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl MemoryPushTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, owner_id: Uuid, token: impl Into<String>) {
        write(&self.tokens).entry(owner_id).or_default().push(token.into());
    }
}

#[async_trait]
impl PushTokenStore for MemoryPushTokens {
    async fn tokens_for_owner(&self, owner_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(read(&self.tokens).get(&owner_id).cloned().unwrap_or_default())
    }
}
