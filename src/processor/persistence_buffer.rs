use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::locks::AnimalLocks;
use crate::config::PersistenceSettings;
use crate::error::StoreError;
use crate::models::reading::TelemetryReading;
use crate::store::TelemetryStore;

/// Device-keyed, last-write-wins accumulator in front of the telemetry
/// store.
///
/// Only the newest reading per device survives until the next flush;
/// intermediate readings are dropped. Memory grows with the number of
/// distinct devices, never with traffic.
pub struct PersistenceBuffer {
    pending: Mutex<HashMap<Uuid, TelemetryReading>>,
    store: Arc<dyn TelemetryStore>,
    soft_capacity: usize,
    over_capacity: AtomicBool,
    locks: Option<AnimalLocks>,
}

impl PersistenceBuffer {
    pub fn new(store: Arc<dyn TelemetryStore>, soft_capacity: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            store,
            soft_capacity,
            over_capacity: AtomicBool::new(false),
            locks: None,
        }
    }

    /// Idle animal lock slots are dropped after every flush tick.
    pub fn with_lock_pruning(mut self, locks: AnimalLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Uuid, TelemetryReading>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never blocks on I/O. A reading older than the one already pending
    /// for its device is discarded.
    pub fn buffer(&self, reading: TelemetryReading) {
        let len = {
            let mut pending = self.pending();
            keep_newest(&mut pending, reading);
            pending.len()
        };

        if len > self.soft_capacity && !self.over_capacity.swap(true, Ordering::Relaxed) {
            warn!(
                pending = len,
                soft_capacity = self.soft_capacity,
                "Persistence buffer above soft capacity"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Takes every pending reading, leaving the buffer empty.
    pub fn drain(&self) -> Vec<TelemetryReading> {
        let taken = std::mem::take(&mut *self.pending());
        self.over_capacity.store(false, Ordering::Relaxed);
        let mut batch: Vec<TelemetryReading> = taken.into_values().collect();
        batch.sort_by_key(|r| r.timestamp);
        batch
    }

    /// Writes the drained batch to the store. On failure the batch goes
    /// back into the buffer, except for devices that received a newer
    /// reading meanwhile.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let batch = self.drain();
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.store.save_batch(&batch).await {
            Ok(()) => {
                debug!(rows = count, "Flushed telemetry batch");
                Ok(count)
            }
            Err(err) => {
                let mut pending = self.pending();
                for reading in batch {
                    keep_newest(&mut pending, reading);
                }
                Err(err)
            }
        }
    }

    /// Flushes on a fixed interval until the task is dropped.
    pub async fn run(self: Arc<Self>, settings: PersistenceSettings) {
        info!(
            interval_secs = settings.flush_interval.as_secs(),
            "Starting persistence flush loop"
        );
        let mut ticker = interval(settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.flush().await {
                error!("Telemetry flush failed: {}", e);
            }
            if let Some(locks) = &self.locks {
                locks.prune();
            }
        }
    }
}

fn keep_newest(pending: &mut HashMap<Uuid, TelemetryReading>, reading: TelemetryReading) {
    match pending.get(&reading.device_id) {
        Some(current) if current.timestamp > reading.timestamp => {}
        _ => {
            pending.insert(reading.device_id, reading);
        }
    }
}
