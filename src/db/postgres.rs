//! Postgres implementations of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{is_unique_violation, queries, DbPool};
use crate::error::StoreError;
use crate::geo::{GeoPoint, Geofence, Polygon};
use crate::models::alert::{Alert, AlertType};
use crate::models::animal::{Animal, Owner};
use crate::models::device::{CollarStatus, Device};
use crate::models::reading::TelemetryReading;
use crate::store::{AlertLedger, PushTokenStore, Registry, TelemetryStore};

fn point(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
        _ => None,
    }
}

fn alert_from_row(row: &PgRow) -> Result<Alert, StoreError> {
    let alert_type: String = row.try_get("alert_type")?;
    let alert_type = alert_type
        .parse::<AlertType>()
        .map_err(|e| StoreError::corrupt("alerts", e))?;

    Ok(Alert {
        id: row.try_get("id")?,
        alert_type,
        animal_id: row.try_get("animal_id")?,
        device_id: row.try_get("device_id")?,
        owner_id: row.try_get("owner_id")?,
        raised_at: row.try_get("raised_at")?,
        resolved: row.try_get("resolved")?,
        resolved_at: row.try_get("resolved_at")?,
        message: row.try_get("message")?,
    })
}

fn device_from_row(row: &PgRow) -> Result<Device, StoreError> {
    let status: String = row.try_get("collar_status")?;
    let collar_status = status
        .parse::<CollarStatus>()
        .map_err(|e| StoreError::corrupt("devices", e))?;

    Ok(Device {
        id: row.try_get("id")?,
        imei: row.try_get("imei")?,
        collar_status,
        animal_id: row.try_get("animal_id")?,
    })
}

fn animal_from_row(row: &PgRow) -> Result<Animal, StoreError> {
    Ok(Animal {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        species: row.try_get("species")?,
        owner_id: row.try_get("owner_id")?,
        herd_id: row.try_get("herd_id")?,
        device_id: row.try_get("device_id")?,
        last_position: point(row.try_get("last_lat")?, row.try_get("last_lng")?),
        last_position_at: row.try_get("last_position_at")?,
        last_inside_geofence: row.try_get("last_inside_geofence")?,
    })
}

/// A stored zone that does not parse is logged and dropped, so the owner
/// is tracked as if no geofence were configured.
fn geofence_from_columns(
    id: Option<Uuid>,
    name: Option<String>,
    wkt: Option<String>,
) -> Option<Geofence> {
    let id = id?;
    match wkt.as_deref().and_then(Polygon::from_wkt) {
        Some(zone) => Some(Geofence { id, name, zone }),
        None => {
            warn!(geofence_id = %id, "Ignoring geofence with invalid polygon");
            None
        }
    }
}

fn owner_from_row(row: &PgRow) -> Result<Owner, StoreError> {
    let geofence = geofence_from_columns(
        row.try_get("geofence_id")?,
        row.try_get("geofence_name")?,
        row.try_get("zone_wkt")?,
    );

    Ok(Owner {
        id: row.try_get("id")?,
        phone: row.try_get("phone")?,
        home_position: point(row.try_get("home_lat")?, row.try_get("home_lng")?),
        geofence,
    })
}

#[derive(Clone)]
pub struct PgAlertLedger {
    pool: DbPool,
}

impl PgAlertLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertLedger for PgAlertLedger {
    async fn find_open_alert(
        &self,
        animal_id: Uuid,
        alert_type: AlertType,
    ) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query(queries::SELECT_OPEN_ALERT)
            .bind(animal_id)
            .bind(alert_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn save(&self, alert: Alert) -> Result<Alert, StoreError> {
        let result = sqlx::query(queries::UPSERT_ALERT)
            .bind(alert.id)
            .bind(alert.alert_type.as_str())
            .bind(alert.animal_id)
            .bind(alert.device_id)
            .bind(alert.owner_id)
            .bind(alert.raised_at)
            .bind(alert.resolved)
            .bind(alert.resolved_at)
            .bind(&alert.message)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(alert),
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    animal_id = %alert.animal_id,
                    alert_type = %alert.alert_type,
                    "Open alert already exists"
                );
                Err(StoreError::Conflict {
                    animal_id: alert.animal_id,
                    alert_type: alert.alert_type,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_open_alerts(&self, animal_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(queries::SELECT_OPEN_ALERTS_FOR_ANIMAL)
            .bind(animal_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn find_by_id(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query(queries::SELECT_ALERT_BY_ID)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }
}

#[derive(Clone)]
pub struct PgRegistry {
    pool: DbPool,
}

impl PgRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Registry for PgRegistry {
    async fn find_device_by_imei(&self, imei: &str) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query(queries::SELECT_DEVICE_BY_IMEI)
            .bind(imei)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_device(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query(queries::SELECT_DEVICE_BY_ID)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn update_collar_status(
        &self,
        device_id: Uuid,
        status: CollarStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(queries::UPDATE_COLLAR_STATUS)
            .bind(device_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_animal(&self, animal_id: Uuid) -> Result<Option<Animal>, StoreError> {
        let row = sqlx::query(queries::SELECT_ANIMAL)
            .bind(animal_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(animal_from_row).transpose()
    }

    async fn find_owner(&self, owner_id: Uuid) -> Result<Option<Owner>, StoreError> {
        let row = sqlx::query(queries::SELECT_OWNER_WITH_GEOFENCE)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(owner_from_row).transpose()
    }

    async fn record_position(
        &self,
        animal_id: Uuid,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(queries::UPDATE_ANIMAL_POSITION)
            .bind(animal_id)
            .bind(position.latitude)
            .bind(position.longitude)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            debug!(animal_id = %animal_id, at = %at, "Cached position is newer, not updated");
        }
        Ok(())
    }

    async fn record_geofence_state(&self, animal_id: Uuid, inside: bool) -> Result<(), StoreError> {
        sqlx::query(queries::UPDATE_ANIMAL_GEOFENCE_STATE)
            .bind(animal_id)
            .bind(inside)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_stale_animals(&self, cutoff: DateTime<Utc>) -> Result<Vec<Animal>, StoreError> {
        let rows = sqlx::query(queries::SELECT_STALE_ANIMALS)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(animal_from_row).collect()
    }
}

#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: DbPool,
}

impl PgTelemetryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    /// All rows land or none do.
    async fn save_batch(&self, readings: &[TelemetryReading]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for r in readings {
            sqlx::query(queries::INSERT_TELEMETRY)
                .bind(r.device_id)
                .bind(&r.device_imei)
                .bind(r.timestamp)
                .bind(r.position.latitude)
                .bind(r.position.longitude)
                .bind(r.speed)
                .bind(r.accel_x)
                .bind(r.accel_y)
                .bind(r.accel_z)
                .bind(r.pressure)
                .bind(r.battery_level.map(i16::from))
                .bind(r.gsm_signal)
                .bind(r.transmission_status.as_str())
                .bind(r.collar_status.map(|s| s.as_str()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgPushTokens {
    pool: DbPool,
}

impl PgPushTokens {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushTokenStore for PgPushTokens {
    async fn tokens_for_owner(&self, owner_id: Uuid) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(queries::SELECT_PUSH_TOKENS)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("token").map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_zone_builds_geofence() {
        let id = Uuid::new_v4();
        let fence = geofence_from_columns(
            Some(id),
            Some("North pasture".to_string()),
            Some("POLYGON((-17 14, -16 14, -16 15, -17 15, -17 14))".to_string()),
        )
        .unwrap();
        assert_eq!(fence.id, id);
        assert!(fence.zone.contains(&GeoPoint::new(14.5, -16.5)));
    }

    #[test]
    fn broken_zone_falls_back_to_no_geofence() {
        let id = Some(Uuid::new_v4());
        assert!(geofence_from_columns(id, None, Some("POLYGON((1 1, 2 2))".to_string())).is_none());
        assert!(geofence_from_columns(id, None, Some("garbage".to_string())).is_none());
        assert!(geofence_from_columns(id, None, None).is_none());
        assert!(geofence_from_columns(None, None, None).is_none());
    }

    #[test]
    fn dropped_geofence_counts_every_position_inside() {
        let fence = geofence_from_columns(Some(Uuid::new_v4()), None, Some("POINT(1 2)".to_string()));
        assert!(crate::geo::contains(fence.as_ref(), &GeoPoint::new(-1.1, 36.7)));
    }
}
