use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::alert_engine::{AlertEngine, EvaluationOutcome, TrackedAnimal};
use super::locks::AnimalLocks;
use super::offline_monitor::OfflineMonitor;
use super::persistence_buffer::PersistenceBuffer;
use crate::dispatch::RealtimeDispatch;
use crate::error::{DecodeError, StoreError};
use crate::models::alert::AlertEvent;
use crate::models::device::Device;
use crate::models::message::{decode_payload, IncomingReading};
use crate::models::position::PositionUpdate;
use crate::models::reading::TelemetryReading;
use crate::store::Registry;

/// What happened to one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// No device with this IMEI; nothing buffered.
    UnknownDevice,
    /// Device not worn by any animal; buffered only.
    Unlinked,
    /// Older than the animal's cached reading; reported status is persisted
    /// and the reading buffered, nothing evaluated.
    OutOfOrder,
    Evaluated {
        outcome: EvaluationOutcome,
        /// DEVICE_OFFLINE resolution caused by this reading.
        reconciled: Option<AlertEvent>,
    },
    /// A store call failed; buffered, nothing dispatched.
    Failed,
}

pub struct IngestionService {
    registry: Arc<dyn Registry>,
    engine: AlertEngine,
    offline: Arc<OfflineMonitor>,
    dispatch: Arc<dyn RealtimeDispatch>,
    buffer: Arc<PersistenceBuffer>,
    locks: AnimalLocks,
}

impl IngestionService {
    pub fn new(
        registry: Arc<dyn Registry>,
        engine: AlertEngine,
        offline: Arc<OfflineMonitor>,
        dispatch: Arc<dyn RealtimeDispatch>,
        buffer: Arc<PersistenceBuffer>,
        locks: AnimalLocks,
    ) -> Self {
        Self {
            registry,
            engine,
            offline,
            dispatch,
            buffer,
            locks,
        }
    }

    /// Decodes a transport payload and ingests it. Decode failures are
    /// returned for the caller to log; they never reach the pipeline.
    pub async fn handle_payload(
        &self,
        payload: &[u8],
        topic: Option<&str>,
    ) -> Result<IngestOutcome, DecodeError> {
        let incoming = decode_payload(payload, topic)?;
        Ok(self.ingest(incoming).await)
    }

    /// Entry point for transports: decode, ingest, log. Never fails.
    pub async fn handle_message(&self, payload: &[u8], topic: Option<&str>) {
        match self.handle_payload(payload, topic).await {
            Ok(IngestOutcome::Failed) => {}
            Ok(outcome) => debug!(?outcome, "Reading processed"),
            Err(e) => warn!(topic = ?topic, "Dropping malformed payload: {}", e),
        }
    }

    pub async fn ingest(&self, incoming: IncomingReading) -> IngestOutcome {
        let device = match self.registry.find_device_by_imei(&incoming.imei).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!(imei = %incoming.imei, "Reading from unknown device, dropping");
                return IngestOutcome::UnknownDevice;
            }
            Err(e) => {
                error!(imei = %incoming.imei, "Device lookup failed: {}", e);
                return IngestOutcome::Failed;
            }
        };

        let reading = incoming.into_reading(&device);
        let outcome = match self.process(&device, &reading).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    imei = %device.imei,
                    animal_id = ?device.animal_id,
                    "Failed to process reading: {}",
                    e
                );
                IngestOutcome::Failed
            }
        };

        self.buffer.buffer(reading);
        outcome
    }

    async fn process(
        &self,
        device: &Device,
        reading: &TelemetryReading,
    ) -> Result<IngestOutcome, StoreError> {
        let Some(animal_id) = device.animal_id else {
            debug!(imei = %device.imei, "Device not linked to an animal");
            self.persist_collar_status(device, reading).await?;
            return Ok(IngestOutcome::Unlinked);
        };

        let _guard = self.locks.lock(animal_id).await;

        // Status checks run against what is stored now, not the IMEI lookup.
        let device = self
            .registry
            .find_device(device.id)
            .await?
            .unwrap_or_else(|| device.clone());
        self.persist_collar_status(&device, reading).await?;

        let Some(mut animal) = self.registry.find_animal(animal_id).await? else {
            warn!(imei = %device.imei, animal_id = %animal_id, "Linked animal not found");
            return Ok(IngestOutcome::Unlinked);
        };

        if animal.is_out_of_order(reading.timestamp) {
            debug!(
                imei = %device.imei,
                animal_id = %animal.id,
                reading_at = %reading.timestamp,
                last_at = ?animal.last_position_at,
                "Out-of-order reading, skipping evaluation"
            );
            return Ok(IngestOutcome::OutOfOrder);
        }

        self.registry
            .record_position(animal.id, reading.position, reading.timestamp)
            .await?;
        animal.last_position = Some(reading.position);
        animal.last_position_at = Some(reading.timestamp);

        let owner = self.registry.find_owner(animal.owner_id).await?;
        let tracked = TrackedAnimal {
            device: device.clone(),
            animal,
            owner,
        };

        let reconciled = self.offline.reconcile(&tracked, reading.timestamp).await?;
        let outcome = self.engine.evaluate(&tracked, reading).await?;

        if tracked.animal.last_inside_geofence != Some(outcome.inside_geofence) {
            self.registry
                .record_geofence_state(tracked.animal.id, outcome.inside_geofence)
                .await?;
        }

        match tracked.owner_key() {
            Some(owner_key) => {
                let update = position_update(&tracked, reading, &outcome);
                self.dispatch.publish_position(owner_key, &update);
                for event in &outcome.emitted {
                    self.dispatch.publish_alert(owner_key, event);
                }
            }
            None => debug!(
                animal_id = %tracked.animal.id,
                "Owner has no routing key, realtime dispatch skipped"
            ),
        }

        if !outcome.emitted.is_empty() {
            info!(
                imei = %device.imei,
                animal_id = %tracked.animal.id,
                changes = outcome.emitted.len(),
                active = ?outcome.active_alert_types,
                "Alerts changed"
            );
        }

        Ok(IngestOutcome::Evaluated {
            outcome,
            reconciled,
        })
    }

    async fn persist_collar_status(
        &self,
        device: &Device,
        reading: &TelemetryReading,
    ) -> Result<(), StoreError> {
        match reading.collar_status {
            Some(status) if status != device.collar_status => {
                info!(
                    imei = %device.imei,
                    from = %device.collar_status,
                    to = %status,
                    "Collar status changed"
                );
                self.registry.update_collar_status(device.id, status).await
            }
            _ => Ok(()),
        }
    }
}

fn position_update(
    tracked: &TrackedAnimal,
    reading: &TelemetryReading,
    outcome: &EvaluationOutcome,
) -> PositionUpdate {
    PositionUpdate {
        animal_id: tracked.animal.id,
        animal_label: tracked.animal.label().to_string(),
        device_id: tracked.device.id,
        device_imei: tracked.device.imei.clone(),
        position: reading.position,
        speed: reading.speed,
        battery_level: reading.battery_level,
        gsm_signal: reading.gsm_signal,
        collar_status: tracked.device.effective_status(reading.collar_status),
        timestamp: reading.timestamp,
        inside_geofence: outcome.inside_geofence,
        geofence_id: outcome.geofence_id,
        geofence_name: outcome.geofence_name.clone(),
        active_alerts: outcome.active_alert_types.clone(),
    }
}
