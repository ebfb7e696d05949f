pub mod alert_engine;
pub mod ingestion;
pub mod locks;
pub mod offline_monitor;
pub mod persistence_buffer;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use crate::config::{AlertSettings, OfflineSettings, PersistenceSettings};
use crate::dispatch::RealtimeDispatch;
use crate::store::{AlertLedger, Registry, TelemetryStore};

use alert_engine::AlertEngine;
use ingestion::IngestionService;
use locks::AnimalLocks;
use offline_monitor::OfflineMonitor;
use persistence_buffer::PersistenceBuffer;

/// Storage the pipeline runs against.
#[derive(Clone)]
pub struct Backends {
    pub registry: Arc<dyn Registry>,
    pub ledger: Arc<dyn AlertLedger>,
    pub telemetry: Arc<dyn TelemetryStore>,
}

/// The wired pipeline. Ingestion and the offline monitor share one set
/// of animal locks.
pub struct Pipeline {
    pub ingestion: Arc<IngestionService>,
    pub offline: Arc<OfflineMonitor>,
    pub buffer: Arc<PersistenceBuffer>,
}

impl Pipeline {
    pub fn new(
        backends: Backends,
        dispatch: Arc<dyn RealtimeDispatch>,
        alerts: AlertSettings,
        offline: OfflineSettings,
        persistence: &PersistenceSettings,
    ) -> Self {
        let locks = AnimalLocks::new();
        let buffer = Arc::new(
            PersistenceBuffer::new(backends.telemetry, persistence.soft_capacity)
                .with_lock_pruning(locks.clone()),
        );
        let offline = Arc::new(OfflineMonitor::new(
            backends.registry.clone(),
            backends.ledger.clone(),
            dispatch.clone(),
            locks.clone(),
            offline,
        ));
        let engine = AlertEngine::new(backends.ledger, alerts);
        let ingestion = Arc::new(IngestionService::new(
            backends.registry,
            engine,
            offline.clone(),
            dispatch,
            buffer.clone(),
            locks,
        ));

        Self {
            ingestion,
            offline,
            buffer,
        }
    }
}
