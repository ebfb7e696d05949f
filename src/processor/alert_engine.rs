//! Rule engine turning one reading into opened/resolved alerts.
//!
//! Every rule follows the same template against the ledger:
//! 1. look up the open alert of its type for the animal
//! 2. compute the "problem" predicate from the reading
//! 3. problem and nothing open: create
//! 4. no problem and something open: resolve
//! 5. anything else: leave the ledger alone
//!
//! Callers must hold the animal's lock (see [`super::locks::AnimalLocks`]).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AlertSettings;
use crate::error::StoreError;
use crate::geo::{self, GeoPoint, Geofence};
use crate::models::alert::{Alert, AlertEvent, AlertType};
use crate::models::animal::{Animal, Owner};
use crate::models::device::Device;
use crate::models::reading::TelemetryReading;
use crate::store::AlertLedger;

/// A device together with the animal wearing it and that animal's owner.
#[derive(Debug, Clone)]
pub struct TrackedAnimal {
    pub device: Device,
    pub animal: Animal,
    pub owner: Option<Owner>,
}

impl TrackedAnimal {
    pub fn geofence(&self) -> Option<&Geofence> {
        self.owner.as_ref().and_then(|o| o.geofence.as_ref())
    }

    pub fn owner_key(&self) -> Option<&str> {
        self.owner.as_ref().and_then(Owner::owner_key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub inside_geofence: bool,
    pub geofence_id: Option<Uuid>,
    pub geofence_name: Option<String>,
    /// Types with an unresolved alert after this evaluation, read back
    /// from the ledger.
    pub active_alert_types: Vec<AlertType>,
    /// Alerts opened or resolved by this reading.
    pub emitted: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Problem,
    Clear,
    /// Between hysteresis thresholds: keep whatever state exists.
    Hold,
}

struct RuleCheck {
    alert_type: AlertType,
    verdict: Verdict,
    raised_message: String,
    resolved_message: String,
}

struct MessageContext<'a> {
    label: &'a str,
    position: String,
    distance: String,
}

pub struct AlertEngine {
    ledger: Arc<dyn AlertLedger>,
    settings: AlertSettings,
}

impl AlertEngine {
    pub fn new(ledger: Arc<dyn AlertLedger>, settings: AlertSettings) -> Self {
        Self { ledger, settings }
    }

    pub async fn evaluate(
        &self,
        tracked: &TrackedAnimal,
        reading: &TelemetryReading,
    ) -> Result<EvaluationOutcome, StoreError> {
        let geofence = tracked.geofence();
        let inside_geofence = geo::contains(geofence, &reading.position);

        let distance = tracked
            .owner
            .as_ref()
            .and_then(|o| o.home_position)
            .map(|home| home.distance_meters(&reading.position));
        let ctx = MessageContext {
            label: tracked.animal.label(),
            position: format_position(&reading.position),
            distance: format_distance(distance),
        };

        let mut emitted = Vec::new();
        for check in self.rule_checks(tracked, reading, inside_geofence, &ctx) {
            if let Some(event) = self.apply(tracked, reading.timestamp, check).await? {
                emitted.push(event);
            }
        }

        let active_alert_types = self.active_alert_types(tracked.animal.id).await?;

        Ok(EvaluationOutcome {
            inside_geofence,
            geofence_id: geofence.map(|g| g.id),
            geofence_name: geofence.and_then(|g| g.name.clone()),
            active_alert_types,
            emitted,
        })
    }

    /// Deduplicated types of every unresolved alert for the animal.
    pub async fn active_alert_types(&self, animal_id: Uuid) -> Result<Vec<AlertType>, StoreError> {
        let open = self.ledger.list_open_alerts(animal_id).await?;
        let types: BTreeSet<AlertType> = open.into_iter().map(|a| a.alert_type).collect();
        Ok(types.into_iter().collect())
    }

    fn rule_checks(
        &self,
        tracked: &TrackedAnimal,
        reading: &TelemetryReading,
        inside_geofence: bool,
        ctx: &MessageContext<'_>,
    ) -> Vec<RuleCheck> {
        let s = &self.settings;
        let mut checks = Vec::with_capacity(5);

        let zone = tracked
            .geofence()
            .and_then(|g| g.name.as_deref())
            .unwrap_or("authorized zone");
        checks.push(RuleCheck {
            alert_type: AlertType::GeofenceExit,
            verdict: if inside_geofence {
                Verdict::Clear
            } else {
                Verdict::Problem
            },
            raised_message: format!(
                "Danger: {} left {}. Position={}, Distance={}",
                ctx.label, zone, ctx.position, ctx.distance
            ),
            resolved_message: format!(
                "{} is back inside {}. Position={}, Distance={}",
                ctx.label, zone, ctx.position, ctx.distance
            ),
        });

        if let Some(battery) = reading.battery_level {
            let verdict = if battery <= s.battery_low {
                Verdict::Problem
            } else if battery >= s.battery_recovery {
                Verdict::Clear
            } else {
                Verdict::Hold
            };
            checks.push(RuleCheck {
                alert_type: AlertType::BatteryLow,
                verdict,
                raised_message: format!(
                    "Low battery ({}%) for {}. Position={}, Distance={}",
                    battery, ctx.label, ctx.position, ctx.distance
                ),
                resolved_message: format!("Battery OK ({}%) for {}.", battery, ctx.label),
            });
        }

        let status = tracked.device.effective_status(reading.collar_status);
        let cut_detected = status.indicates_theft()
            || reading.pressure.map_or(false, |p| p <= s.pressure_cut);
        checks.push(RuleCheck {
            alert_type: AlertType::CollarCut,
            verdict: if cut_detected {
                Verdict::Problem
            } else {
                Verdict::Clear
            },
            raised_message: format!(
                "Danger: the collar of {} has been cut, possible theft. Position={}, Distance={}",
                ctx.label, ctx.position, ctx.distance
            ),
            resolved_message: format!("The collar of {} is no longer reported as cut.", ctx.label),
        });

        // a cut reading never also counts as tampering
        if let Some(pressure) = reading.pressure.filter(|_| !cut_detected) {
            let tampering = pressure > s.pressure_cut && pressure <= s.pressure_tampering;
            checks.push(RuleCheck {
                alert_type: AlertType::CollarTampering,
                verdict: if tampering {
                    Verdict::Problem
                } else {
                    Verdict::Clear
                },
                raised_message: format!(
                    "Danger: the collar of {} is being tampered with. Position={}, Distance={}",
                    ctx.label, ctx.position, ctx.distance
                ),
                resolved_message: format!(
                    "The collar of {} no longer shows signs of tampering.",
                    ctx.label
                ),
            });
        }

        if let Some(speed) = reading.speed {
            checks.push(RuleCheck {
                alert_type: AlertType::SpeedSuspect,
                verdict: if speed >= s.speed_suspect_mps {
                    Verdict::Problem
                } else {
                    Verdict::Clear
                },
                raised_message: format!(
                    "Danger: {} is moving at an abnormal speed ({:.2} m/s). Position={}, Distance={}",
                    ctx.label, speed, ctx.position, ctx.distance
                ),
                resolved_message: format!("The speed of {} is back to normal.", ctx.label),
            });
        }

        checks
    }

    async fn apply(
        &self,
        tracked: &TrackedAnimal,
        at: DateTime<Utc>,
        check: RuleCheck,
    ) -> Result<Option<AlertEvent>, StoreError> {
        if check.verdict == Verdict::Hold {
            return Ok(None);
        }

        let animal = &tracked.animal;
        let existing = self.ledger.find_open_alert(animal.id, check.alert_type).await?;

        match (check.verdict, existing) {
            (Verdict::Problem, None) => {
                let alert = Alert::open(
                    check.alert_type,
                    animal.id,
                    Some(tracked.device.id),
                    animal.owner_id,
                    at,
                    check.raised_message,
                );
                match self.ledger.save(alert).await {
                    Ok(saved) => {
                        info!(
                            animal_id = %animal.id,
                            alert_type = %saved.alert_type,
                            alert_id = %saved.id,
                            "Alert opened"
                        );
                        Ok(Some(saved.to_event()))
                    }
                    Err(err) if err.is_conflict() => {
                        debug!(
                            animal_id = %animal.id,
                            alert_type = %check.alert_type,
                            "Alert already open, skipping creation"
                        );
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            (Verdict::Clear, Some(mut alert)) => {
                alert.resolve(at, check.resolved_message);
                let saved = self.ledger.save(alert).await?;
                info!(
                    animal_id = %animal.id,
                    alert_type = %saved.alert_type,
                    alert_id = %saved.id,
                    "Alert resolved"
                );
                Ok(Some(saved.to_event()))
            }
            _ => Ok(None),
        }
    }
}

pub fn format_position(point: &GeoPoint) -> String {
    format!("{:.5}, {:.5}", point.latitude, point.longitude)
}

pub fn format_distance(meters: Option<f64>) -> String {
    match meters {
        None => "unknown".to_string(),
        Some(m) if m >= 1000.0 => format!("{:.2} km", m / 1000.0),
        Some(m) => format!("{:.0} m", m),
    }
}
