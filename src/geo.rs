//! WGS84 geometry used by the alert rules.
//!
//! Coordinates are plain degrees. Polygons are small (a pasture, a farm)
//! so containment is done with a planar ray cast on lon/lat, which is
//! accurate enough at that scale.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `true` when both coordinates are finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        distance_meters(self, other)
    }
}

/// Great-circle distance using the haversine formula.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// A simple polygon described by its exterior ring.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    ring: Vec<GeoPoint>,
}

impl Polygon {
    /// Builds a polygon from its vertices. A closing vertex equal to the
    /// first one is dropped. Returns `None` for fewer than three vertices.
    pub fn new(mut vertices: Vec<GeoPoint>) -> Option<Self> {
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 || vertices.iter().any(|v| !v.is_valid()) {
            return None;
        }
        Some(Self { ring: vertices })
    }

    /// Parses `POLYGON((lon lat, lon lat, ...))` as written by PostGIS
    /// `ST_AsText`. Only the exterior ring is kept.
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let trimmed = wkt.trim();
        let body = trimmed
            .get(..7)
            .filter(|head| head.eq_ignore_ascii_case("POLYGON"))
            .map(|_| trimmed[7..].trim())?;
        let inner = body.strip_prefix("((")?;
        let ring_end = inner.find(')')?;

        let vertices = inner[..ring_end]
            .split(',')
            .map(|pair| {
                let mut parts = pair.split_whitespace();
                let lon = parts.next()?.parse::<f64>().ok()?;
                let lat = parts.next()?.parse::<f64>().ok()?;
                Some(GeoPoint::new(lat, lon))
            })
            .collect::<Option<Vec<_>>>()?;

        Self::new(vertices)
    }

    /// Containment test. Points on an edge or vertex count as inside.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let (px, py) = (point.longitude, point.latitude);
        let n = self.ring.len();
        let mut inside = false;

        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[(i + 1) % n];
            if on_segment(px, py, &a, &b) {
                return true;
            }

            let (ax, ay, bx, by) = (a.longitude, a.latitude, b.longitude, b.latitude);
            if (ay > py) != (by > py) {
                let x_cross = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < x_cross {
                    inside = !inside;
                }
            }
        }

        inside
    }
}

fn on_segment(px: f64, py: f64, a: &GeoPoint, b: &GeoPoint) -> bool {
    let (ax, ay, bx, by) = (a.longitude, a.latitude, b.longitude, b.latitude);
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross.abs() > EPSILON {
        return false;
    }
    px >= ax.min(bx) - EPSILON
        && px <= ax.max(bx) + EPSILON
        && py >= ay.min(by) - EPSILON
        && py <= ay.max(by) + EPSILON
}

/// The grazing zone of an owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Geofence {
    pub id: Uuid,
    pub name: Option<String>,
    pub zone: Polygon,
}

/// Fail-open containment: no geofence means every position is inside.
pub fn contains(geofence: Option<&Geofence>, point: &GeoPoint) -> bool {
    match geofence {
        Some(fence) => fence.zone.contains(point),
        None => true,
    }
}
