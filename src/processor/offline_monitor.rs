use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::alert_engine::{format_position, TrackedAnimal};
use super::locks::AnimalLocks;
use crate::config::OfflineSettings;
use crate::dispatch::RealtimeDispatch;
use crate::error::StoreError;
use crate::models::alert::{Alert, AlertEvent, AlertType};
use crate::models::animal::Animal;
use crate::store::{AlertLedger, Registry};

/// Animals checked in parallel during one sweep.
const SWEEP_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub opened: usize,
    pub already_open: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaleCheck {
    Opened,
    AlreadyOpen,
    Skipped,
}

/// Raises DEVICE_OFFLINE for animals whose collar went quiet and clears
/// it again when a reading shows up.
pub struct OfflineMonitor {
    registry: Arc<dyn Registry>,
    ledger: Arc<dyn AlertLedger>,
    dispatch: Arc<dyn RealtimeDispatch>,
    locks: AnimalLocks,
    settings: OfflineSettings,
}

impl OfflineMonitor {
    pub fn new(
        registry: Arc<dyn Registry>,
        ledger: Arc<dyn AlertLedger>,
        dispatch: Arc<dyn RealtimeDispatch>,
        locks: AnimalLocks,
        settings: OfflineSettings,
    ) -> Self {
        Self {
            registry,
            ledger,
            dispatch,
            locks,
            settings,
        }
    }

    /// One pass over every stale animal. A failure on one animal is
    /// logged and counted; only a failed stale-animal query fails the
    /// sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        if !self.settings.is_enabled() {
            debug!("Offline sweep disabled (non-positive threshold)");
            return Ok(SweepReport::default());
        }

        let cutoff = now - self.settings.threshold;
        let stale = self.registry.find_stale_animals(cutoff).await?;
        let mut report = SweepReport {
            stale: stale.len(),
            ..SweepReport::default()
        };

        let results: Vec<_> = stream::iter(stale)
            .map(|animal| async move {
                let animal_id = animal.id;
                (animal_id, self.check_stale(animal, cutoff, now).await)
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        for (animal_id, result) in results {
            match result {
                Ok(StaleCheck::Opened) => report.opened += 1,
                Ok(StaleCheck::AlreadyOpen) => report.already_open += 1,
                Ok(StaleCheck::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(animal_id = %animal_id, "Offline check failed: {}", e);
                }
            }
        }

        // slots of animals that went quiet are no longer needed
        self.locks.prune();
        Ok(report)
    }

    async fn check_stale(
        &self,
        candidate: Animal,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<StaleCheck, StoreError> {
        let _guard = self.locks.lock(candidate.id).await;

        // a reading may have landed between the query and the lock
        let Some(animal) = self.registry.find_animal(candidate.id).await? else {
            return Ok(StaleCheck::Skipped);
        };
        let Some(last_seen) = animal.last_position_at.filter(|at| *at < cutoff) else {
            return Ok(StaleCheck::Skipped);
        };
        let Some(device_id) = animal.device_id else {
            return Ok(StaleCheck::Skipped);
        };
        let Some(device) = self.registry.find_device(device_id).await? else {
            return Ok(StaleCheck::Skipped);
        };
        let Some(owner) = self.registry.find_owner(animal.owner_id).await? else {
            return Ok(StaleCheck::Skipped);
        };
        let Some(owner_key) = owner.owner_key().map(str::to_string) else {
            debug!(animal_id = %animal.id, "Offline check skipped: owner has no routing key");
            return Ok(StaleCheck::Skipped);
        };

        if self
            .ledger
            .find_open_alert(animal.id, AlertType::DeviceOffline)
            .await?
            .is_some()
        {
            return Ok(StaleCheck::AlreadyOpen);
        }

        let minutes = (now - last_seen).num_minutes().max(0);
        let last_position = animal
            .last_position
            .as_ref()
            .map(format_position)
            .unwrap_or_else(|| "unknown".to_string());
        let message = format!(
            "Tracker offline for {} (IMEI={}). Last telemetry {} min ago ({}), Position={}",
            animal.label(),
            device.imei,
            minutes,
            last_seen.to_rfc3339(),
            last_position
        );
        let alert = Alert::open(
            AlertType::DeviceOffline,
            animal.id,
            Some(device.id),
            animal.owner_id,
            now,
            message,
        );

        let saved = match self.ledger.save(alert).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => return Ok(StaleCheck::AlreadyOpen),
            Err(e) => return Err(e),
        };
        warn!(
            animal_id = %animal.id,
            imei = %device.imei,
            minutes,
            "Device offline"
        );
        self.dispatch.publish_alert(&owner_key, &saved.to_event());
        Ok(StaleCheck::Opened)
    }

    /// Resolves the open DEVICE_OFFLINE alert, if any, at `at`. The
    /// caller must hold the animal's lock. Calling it again is a no-op.
    pub async fn reconcile(
        &self,
        tracked: &TrackedAnimal,
        at: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, StoreError> {
        let Some(mut alert) = self
            .ledger
            .find_open_alert(tracked.animal.id, AlertType::DeviceOffline)
            .await?
        else {
            return Ok(None);
        };

        alert.resolve(
            at,
            format!(
                "Tracker back online for {} (IMEI={}).",
                tracked.animal.label(),
                tracked.device.imei
            ),
        );
        let saved = self.ledger.save(alert).await?;
        info!(
            animal_id = %tracked.animal.id,
            imei = %tracked.device.imei,
            "Device back online"
        );

        let event = saved.to_event();
        if let Some(owner_key) = tracked.owner_key() {
            self.dispatch.publish_alert(owner_key, &event);
        }
        Ok(Some(event))
    }

    /// Sweeps on a fixed interval after the initial delay. Never returns.
    pub async fn run(self: Arc<Self>) {
        if !self.settings.is_enabled() {
            info!("Offline monitor disabled");
            return;
        }

        sleep(self.settings.initial_delay).await;
        info!(
            threshold_secs = self.settings.threshold.num_seconds(),
            interval_secs = self.settings.check_interval.as_secs(),
            "Starting offline monitor"
        );

        let mut ticker = interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(report) if report.opened > 0 || report.failed > 0 => {
                    info!(
                        stale = report.stale,
                        opened = report.opened,
                        failed = report.failed,
                        "Offline sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Offline sweep failed: {}", e),
            }
        }
    }
}
