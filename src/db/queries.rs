/// Bootstrap DDL, applied in order at startup.
pub const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS owners (
    id UUID PRIMARY KEY,
    phone TEXT,
    home_lat DOUBLE PRECISION,
    home_lng DOUBLE PRECISION
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS geofences (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL UNIQUE REFERENCES owners (id),
    name TEXT,
    zone_wkt TEXT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS devices (
    id UUID PRIMARY KEY,
    imei VARCHAR(15) NOT NULL UNIQUE,
    collar_status TEXT NOT NULL DEFAULT 'ACTIVE'
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS animals (
    id UUID PRIMARY KEY,
    name TEXT,
    species TEXT,
    owner_id UUID NOT NULL REFERENCES owners (id),
    herd_id UUID,
    device_id UUID UNIQUE REFERENCES devices (id),
    last_lat DOUBLE PRECISION,
    last_lng DOUBLE PRECISION,
    last_position_at TIMESTAMPTZ,
    last_inside_geofence BOOLEAN
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS animals_last_position_at_idx ON animals (last_position_at);
"#,
    r#"
CREATE TABLE IF NOT EXISTS alerts (
    id UUID PRIMARY KEY,
    alert_type TEXT NOT NULL,
    animal_id UUID NOT NULL REFERENCES animals (id),
    device_id UUID REFERENCES devices (id),
    owner_id UUID NOT NULL REFERENCES owners (id),
    raised_at TIMESTAMPTZ NOT NULL,
    resolved BOOLEAN NOT NULL DEFAULT FALSE,
    resolved_at TIMESTAMPTZ,
    message TEXT NOT NULL
);
"#,
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS alerts_one_open_per_type
    ON alerts (animal_id, alert_type) WHERE NOT resolved;
"#,
    r#"
CREATE TABLE IF NOT EXISTS telemetry (
    id BIGSERIAL PRIMARY KEY,
    device_id UUID NOT NULL REFERENCES devices (id),
    imei VARCHAR(15) NOT NULL,
    ts TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lng DOUBLE PRECISION NOT NULL,
    speed DOUBLE PRECISION,
    accel_x DOUBLE PRECISION,
    accel_y DOUBLE PRECISION,
    accel_z DOUBLE PRECISION,
    pressure DOUBLE PRECISION,
    battery_level SMALLINT,
    gsm_signal INTEGER,
    transmission_status TEXT NOT NULL,
    collar_status TEXT
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS telemetry_device_ts_idx ON telemetry (device_id, ts DESC);
"#,
    r#"
CREATE TABLE IF NOT EXISTS push_tokens (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL REFERENCES owners (id),
    token TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (owner_id, token)
);
"#,
];

pub const SELECT_OPEN_ALERT: &str = r#"
SELECT id, alert_type, animal_id, device_id, owner_id, raised_at, resolved, resolved_at, message
FROM alerts
WHERE animal_id = $1 AND alert_type = $2 AND NOT resolved
ORDER BY raised_at DESC
LIMIT 1;
"#;

pub const SELECT_OPEN_ALERTS_FOR_ANIMAL: &str = r#"
SELECT id, alert_type, animal_id, device_id, owner_id, raised_at, resolved, resolved_at, message
FROM alerts
WHERE animal_id = $1 AND NOT resolved
ORDER BY raised_at;
"#;

pub const SELECT_ALERT_BY_ID: &str = r#"
SELECT id, alert_type, animal_id, device_id, owner_id, raised_at, resolved, resolved_at, message
FROM alerts
WHERE id = $1;
"#;

pub const UPSERT_ALERT: &str = r#"
INSERT INTO alerts (id, alert_type, animal_id, device_id, owner_id, raised_at, resolved, resolved_at, message)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (id) DO UPDATE
SET resolved = EXCLUDED.resolved,
    resolved_at = EXCLUDED.resolved_at,
    message = EXCLUDED.message;
"#;

pub const SELECT_DEVICE_BY_IMEI: &str = r#"
SELECT d.id, d.imei, d.collar_status, a.id AS animal_id
FROM devices d
LEFT JOIN animals a ON a.device_id = d.id
WHERE d.imei = $1;
"#;

pub const SELECT_DEVICE_BY_ID: &str = r#"
SELECT d.id, d.imei, d.collar_status, a.id AS animal_id
FROM devices d
LEFT JOIN animals a ON a.device_id = d.id
WHERE d.id = $1;
"#;

pub const UPDATE_COLLAR_STATUS: &str = r#"
UPDATE devices SET collar_status = $2 WHERE id = $1;
"#;

pub const SELECT_ANIMAL: &str = r#"
SELECT id, name, species, owner_id, herd_id, device_id,
       last_lat, last_lng, last_position_at, last_inside_geofence
FROM animals
WHERE id = $1;
"#;

pub const SELECT_STALE_ANIMALS: &str = r#"
SELECT id, name, species, owner_id, herd_id, device_id,
       last_lat, last_lng, last_position_at, last_inside_geofence
FROM animals
WHERE device_id IS NOT NULL
  AND last_position_at < $1;
"#;

/// Ignores readings older than the cached one.
pub const UPDATE_ANIMAL_POSITION: &str = r#"
UPDATE animals
SET last_lat = $2,
    last_lng = $3,
    last_position_at = $4
WHERE id = $1
  AND (last_position_at IS NULL OR last_position_at <= $4);
"#;

pub const UPDATE_ANIMAL_GEOFENCE_STATE: &str = r#"
UPDATE animals SET last_inside_geofence = $2 WHERE id = $1;
"#;

pub const SELECT_OWNER_WITH_GEOFENCE: &str = r#"
SELECT o.id, o.phone, o.home_lat, o.home_lng,
       g.id AS geofence_id, g.name AS geofence_name, g.zone_wkt
FROM owners o
LEFT JOIN geofences g ON g.owner_id = o.id
WHERE o.id = $1;
"#;

pub const INSERT_TELEMETRY: &str = r#"
INSERT INTO telemetry (
    device_id, imei, ts, lat, lng, speed, accel_x, accel_y, accel_z,
    pressure, battery_level, gsm_signal, transmission_status, collar_status
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14);
"#;

pub const SELECT_PUSH_TOKENS: &str = r#"
SELECT token FROM push_tokens WHERE owner_id = $1 ORDER BY created_at;
"#;
