use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::geo::{GeoPoint, Geofence};

const UNKNOWN_LABEL: &str = "unknown";

/// Cached projection of an animal. Ingestion is the only writer of the
/// `last_*` fields; the offline sweep reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct Animal {
    pub id: Uuid,
    pub name: Option<String>,
    pub species: Option<String>,
    pub owner_id: Uuid,
    pub herd_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub last_position: Option<GeoPoint>,
    pub last_position_at: Option<DateTime<Utc>>,
    /// `None` until the first reading has been evaluated.
    pub last_inside_geofence: Option<bool>,
}

impl Animal {
    /// Human readable label used in alert messages.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.species.as_deref())
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// `true` when `at` is older than the cached last reading.
    pub fn is_out_of_order(&self, at: DateTime<Utc>) -> bool {
        self.last_position_at.map_or(false, |last| at < last)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub id: Uuid,
    /// Phone number used to route realtime and push messages.
    pub phone: Option<String>,
    pub home_position: Option<GeoPoint>,
    pub geofence: Option<Geofence>,
}

impl Owner {
    pub fn owner_key(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn animal(name: Option<&str>, species: Option<&str>) -> Animal {
        Animal {
            id: Uuid::new_v4(),
            name: name.map(str::to_string),
            species: species.map(str::to_string),
            owner_id: Uuid::new_v4(),
            herd_id: None,
            device_id: None,
            last_position: None,
            last_position_at: None,
            last_inside_geofence: None,
        }
    }

    #[test]
    fn label_falls_back_to_species_then_unknown() {
        assert_eq!(animal(Some("Bessie"), Some("COW")).label(), "Bessie");
        assert_eq!(animal(Some("  "), Some("COW")).label(), "COW");
        assert_eq!(animal(None, None).label(), "unknown");
    }

    #[test]
    fn blank_phone_is_not_an_owner_key() {
        let mut owner = Owner {
            id: Uuid::new_v4(),
            phone: Some("   ".to_string()),
            home_position: None,
            geofence: None,
        };
        assert_eq!(owner.owner_key(), None);
        owner.phone = Some("221770000001".to_string());
        assert_eq!(owner.owner_key(), Some("221770000001"));
    }

    #[test]
    fn out_of_order_compares_against_cached_timestamp() {
        let now = Utc::now();
        let mut a = animal(None, None);
        assert!(!a.is_out_of_order(now));
        a.last_position_at = Some(now);
        assert!(a.is_out_of_order(now - Duration::seconds(1)));
        assert!(!a.is_out_of_order(now));
        assert!(!a.is_out_of_order(now + Duration::seconds(1)));
    }
}
