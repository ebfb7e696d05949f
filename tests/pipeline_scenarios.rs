use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use livestock_telemetry::config::{AlertSettings, OfflineSettings, PersistenceSettings};
use livestock_telemetry::dispatch::push::{PushMessage, PushNotifier, PushTransport};
use livestock_telemetry::dispatch::{BroadcastDispatcher, OutboundPayload};
use livestock_telemetry::error::PushError;
use livestock_telemetry::geo::{GeoPoint, Geofence, Polygon};
use livestock_telemetry::models::alert::AlertType;
use livestock_telemetry::models::animal::{Animal, Owner};
use livestock_telemetry::models::device::{CollarStatus, Device};
use livestock_telemetry::models::message::IncomingReading;
use livestock_telemetry::processor::ingestion::IngestOutcome;
use livestock_telemetry::processor::{Backends, Pipeline};
use livestock_telemetry::store::{
    MemoryAlertLedger, MemoryPushTokens, MemoryRegistry, MemoryTelemetryStore,
};
use uuid::Uuid;

const IMEI: &str = "490154203237518";

struct Ranch {
    registry: Arc<MemoryRegistry>,
    ledger: Arc<MemoryAlertLedger>,
    telemetry: Arc<MemoryTelemetryStore>,
    dispatcher: Arc<BroadcastDispatcher>,
    pipeline: Pipeline,
    animal_id: Uuid,
    owner_id: Uuid,
}

fn paddock() -> Geofence {
    // closed ring, as stored by the mapping UI
    let zone = Polygon::new(vec![
        GeoPoint::new(-1.30, 36.70),
        GeoPoint::new(-1.30, 36.80),
        GeoPoint::new(-1.20, 36.80),
        GeoPoint::new(-1.20, 36.70),
        GeoPoint::new(-1.30, 36.70),
    ])
    .expect("valid paddock");
    Geofence {
        id: Uuid::new_v4(),
        name: Some("Home paddock".to_string()),
        zone,
    }
}

fn grazing() -> GeoPoint {
    GeoPoint::new(-1.25, 36.75)
}

fn wandering() -> GeoPoint {
    GeoPoint::new(-1.10, 36.75)
}

fn ranch_with<F>(dispatcher: F) -> Ranch
where
    F: FnOnce(&Arc<MemoryAlertLedger>) -> BroadcastDispatcher,
{
    let registry = Arc::new(MemoryRegistry::new());
    let ledger = Arc::new(MemoryAlertLedger::new());
    let telemetry = Arc::new(MemoryTelemetryStore::new());
    let dispatcher = Arc::new(dispatcher(&ledger));

    let owner = Owner {
        id: Uuid::new_v4(),
        phone: Some("254700000001".to_string()),
        home_position: Some(GeoPoint::new(-1.26, 36.74)),
        geofence: Some(paddock()),
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
    registry.insert_device(Device {
        id: device_id,
        imei: IMEI.to_string(),
        collar_status: CollarStatus::Active,
        animal_id: Some(animal.id),
    });
    let (animal_id, owner_id) = (animal.id, owner.id);
    registry.insert_animal(animal);
    registry.insert_owner(owner);

    let pipeline = Pipeline::new(
        Backends {
            registry: registry.clone(),
            ledger: ledger.clone(),
            telemetry: telemetry.clone(),
        },
        dispatcher.clone(),
        AlertSettings::default(),
        OfflineSettings::default(),
        &PersistenceSettings::default(),
    );

    Ranch {
        registry,
        ledger,
        telemetry,
        dispatcher,
        pipeline,
        animal_id,
        owner_id,
    }
}

fn ranch() -> Ranch {
    ranch_with(|_| BroadcastDispatcher::new(256))
}

fn reading(at: DateTime<Utc>, position: GeoPoint) -> IncomingReading {
    IncomingReading {
        imei: IMEI.to_string(),
        timestamp: at,
        position,
        speed: Some(0.4),
        accel_x: None,
        accel_y: None,
        accel_z: None,
        pressure: Some(0.9),
        battery_level: Some(88),
        gsm_signal: Some(-71),
        collar_status: None,
        transmission_status: None,
    }
}

#[tokio::test]
async fn bessie_leaves_and_returns_to_the_paddock() {
    let ranch = ranch();
    let mut rx = ranch.dispatcher.subscribe();
    let t0 = Utc::now();
    let t1 = t0 + Duration::minutes(4);

    let left = ranch.pipeline.ingestion.ingest(reading(t0, wandering())).await;
    let IngestOutcome::Evaluated { outcome: left, .. } = left else {
        panic!("expected evaluation");
    };
    assert_eq!(left.emitted.len(), 1);
    let opened = left.emitted[0].clone();
    assert_eq!(opened.alert_type, AlertType::GeofenceExit);
    assert!(!opened.resolved);

    let back = ranch.pipeline.ingestion.ingest(reading(t1, grazing())).await;
    let IngestOutcome::Evaluated { outcome: back, .. } = back else {
        panic!("expected evaluation");
    };
    assert_eq!(back.emitted.len(), 1);
    let resolved = &back.emitted[0];
    assert_eq!(resolved.alert_id, opened.alert_id);
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_at, Some(t1));
    assert!(back.inside_geofence);

    let mut alert_events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if message.destination == "/queue/alerts" {
            if let OutboundPayload::Alert(event) = message.payload {
                alert_events.push(event);
            }
        }
    }
    assert_eq!(alert_events.len(), 2);
    assert!(!alert_events[0].resolved);
    assert!(alert_events[1].resolved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readings_open_a_single_alert() {
    let ranch = ranch();
    let t0 = Utc::now();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let ingestion = ranch.pipeline.ingestion.clone();
        tasks.push(tokio::spawn(async move {
            ingestion.ingest(reading(t0, wandering())).await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let alerts = ranch.ledger.for_animal(ranch.animal_id, AlertType::GeofenceExit);
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].resolved);
}

#[tokio::test]
async fn silent_collar_goes_offline_once_and_recovers() {
    let ranch = ranch();
    let now = Utc::now();
    ranch
        .pipeline
        .ingestion
        .ingest(reading(now - Duration::minutes(10), grazing()))
        .await;

    let first = ranch.pipeline.offline.sweep(now).await.unwrap();
    let second = ranch.pipeline.offline.sweep(now + Duration::seconds(30)).await.unwrap();
    assert_eq!(first.opened, 1);
    assert_eq!(second.opened, 0);

    let offline = ranch.ledger.for_animal(ranch.animal_id, AlertType::DeviceOffline);
    assert_eq!(offline.len(), 1);
    assert!(!offline[0].resolved);

    let back_at = now + Duration::minutes(1);
    let outcome = ranch.pipeline.ingestion.ingest(reading(back_at, grazing())).await;
    let IngestOutcome::Evaluated { reconciled, outcome } = outcome else {
        panic!("expected evaluation");
    };
    assert_eq!(reconciled.map(|e| e.resolved_at), Some(Some(back_at)));
    assert!(!outcome.active_alert_types.contains(&AlertType::DeviceOffline));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweep_racing_a_fresh_reading_leaves_no_open_offline_alert() {
    let ranch = ranch();
    let now = Utc::now();
    ranch
        .pipeline
        .ingestion
        .ingest(reading(now - Duration::minutes(30), grazing()))
        .await;

    let offline = ranch.pipeline.offline.clone();
    let ingestion = ranch.pipeline.ingestion.clone();
    let (sweep, _) = tokio::join!(
        tokio::spawn(async move { offline.sweep(now).await }),
        tokio::spawn(async move { ingestion.ingest(reading(now, grazing())).await }),
    );
    sweep.unwrap().unwrap();

    let open = ranch
        .ledger
        .for_animal(ranch.animal_id, AlertType::DeviceOffline)
        .into_iter()
        .filter(|a| !a.resolved)
        .count();
    assert_eq!(open, 0);
}

#[tokio::test]
async fn burst_from_one_collar_persists_only_latest_reading() {
    let ranch = ranch();
    let t0 = Utc::now();

    let mut first = reading(t0, grazing());
    first.battery_level = Some(61);
    let mut second = reading(t0 + Duration::seconds(5), grazing());
    second.battery_level = Some(60);
    ranch.pipeline.ingestion.ingest(first).await;
    ranch.pipeline.ingestion.ingest(second).await;

    assert_eq!(ranch.pipeline.buffer.flush().await.unwrap(), 1);
    let rows = ranch.telemetry.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].battery_level, Some(60));

    let animal = ranch.registry.animal(ranch.animal_id).unwrap();
    assert_eq!(animal.last_position_at, Some(t0 + Duration::seconds(5)));
}

#[derive(Default)]
struct CapturingTransport {
    sent: Mutex<Vec<(PushMessage, Vec<String>)>>,
}

#[async_trait]
impl PushTransport for CapturingTransport {
    async fn send(&self, message: &PushMessage, tokens: &[String]) -> Result<(), PushError> {
        self.sent.lock().unwrap().push((message.clone(), tokens.to_vec()));
        Ok(())
    }
}

#[tokio::test]
async fn cut_collar_pushes_to_owner_phone() {
    let tokens = Arc::new(MemoryPushTokens::new());
    let transport = Arc::new(CapturingTransport::default());
    let ranch = ranch_with(|ledger| {
        let notifier = PushNotifier::new(ledger.clone(), tokens.clone(), transport.clone());
        BroadcastDispatcher::new(64).with_push(Arc::new(notifier))
    });
    tokens.register(ranch.owner_id, "phone-token-1");

    let mut cut = reading(Utc::now(), grazing());
    cut.pressure = Some(0.05);
    ranch.pipeline.ingestion.ingest(cut).await;

    for _ in 0..50 {
        if !transport.sent.lock().unwrap().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.data["type"], "COLLAR_CUT");
    assert_eq!(sent[0].1, vec!["phone-token-1".to_string()]);
}
