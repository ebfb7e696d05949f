//! Inbound collar payloads.
//!
//! Collars publish either a JSON document or a protobuf `CollarFrame`.
//! Both are decoded into an [`IncomingReading`], validated, and only
//! then handed to the ingestion pipeline.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use prost::Message as _;
use serde::{Deserialize, Deserializer};

use super::device::{is_valid_imei, CollarStatus, Device};
use super::reading::{TelemetryReading, TransmissionStatus};
use crate::error::DecodeError;
use crate::geo::GeoPoint;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub device_imei: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub position: Option<PositionPayload>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accel_x: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accel_y: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accel_z: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub pressure: Option<f64>,
    #[serde(default, deserialize_with = "parse_i64_option")]
    pub battery_level: Option<i64>,
    #[serde(default, deserialize_with = "parse_i64_option")]
    pub gsm_signal: Option<i64>,
    pub status_collar: Option<String>,
    pub transmission_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PositionPayload {
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    Epoch(i64),
}

/// Binary frame sent by collars on constrained links.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CollarFrame {
    #[prost(string, tag = "1")]
    pub device_imei: String,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp_ms: i64,
    #[prost(double, tag = "3")]
    pub latitude: f64,
    #[prost(double, tag = "4")]
    pub longitude: f64,
    #[prost(double, optional, tag = "5")]
    pub speed: Option<f64>,
    #[prost(double, optional, tag = "6")]
    pub accel_x: Option<f64>,
    #[prost(double, optional, tag = "7")]
    pub accel_y: Option<f64>,
    #[prost(double, optional, tag = "8")]
    pub accel_z: Option<f64>,
    #[prost(double, optional, tag = "9")]
    pub pressure: Option<f64>,
    #[prost(uint32, optional, tag = "10")]
    pub battery_level: Option<u32>,
    #[prost(int32, optional, tag = "11")]
    pub gsm_signal: Option<i32>,
    #[prost(enumeration = "CollarStatusCode", optional, tag = "12")]
    pub collar_status: Option<i32>,
    #[prost(enumeration = "TransmissionCode", optional, tag = "13")]
    pub transmission_status: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CollarStatusCode {
    Unspecified = 0,
    Active = 1,
    Inactive = 2,
    Stolen = 3,
    Destroyed = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TransmissionCode {
    Unspecified = 0,
    Sent = 1,
    Pending = 2,
    Failed = 3,
}

/// A decoded and validated reading, not yet bound to a device record.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingReading {
    pub imei: String,
    pub timestamp: DateTime<Utc>,
    pub position: GeoPoint,
    pub speed: Option<f64>,
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    pub pressure: Option<f64>,
    pub battery_level: Option<u8>,
    pub gsm_signal: Option<i32>,
    pub collar_status: Option<CollarStatus>,
    pub transmission_status: Option<TransmissionStatus>,
}

impl IncomingReading {
    pub fn into_reading(self, device: &Device) -> TelemetryReading {
        TelemetryReading {
            device_id: device.id,
            device_imei: device.imei.clone(),
            timestamp: self.timestamp,
            position: self.position,
            speed: self.speed,
            accel_x: self.accel_x,
            accel_y: self.accel_y,
            accel_z: self.accel_z,
            pressure: self.pressure,
            battery_level: self.battery_level,
            gsm_signal: self.gsm_signal,
            transmission_status: self.transmission_status.unwrap_or_default(),
            collar_status: self.collar_status,
        }
    }
}

/// Extracts the IMEI from topics shaped like `.../collars/{imei}/telemetry`.
pub fn imei_from_topic(topic: &str) -> Option<&str> {
    let segments: Vec<&str> = topic.split('/').collect();
    segments.windows(3).find_map(|w| {
        (w[0] == "collars" && w[2] == "telemetry" && is_valid_imei(w[1])).then_some(w[1])
    })
}

/// Decodes a raw payload. JSON when it starts with `{`, protobuf otherwise.
pub fn decode_payload(payload: &[u8], topic: Option<&str>) -> Result<IncomingReading, DecodeError> {
    let topic_imei = topic.and_then(imei_from_topic);
    let is_json = payload
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |b| *b == b'{');

    if is_json {
        let parsed: TelemetryPayload = serde_json::from_slice(payload)?;
        from_json(parsed, topic_imei)
    } else {
        let frame = CollarFrame::decode(payload)?;
        from_frame(frame, topic_imei)
    }
}

fn resolve_imei(provided: Option<&str>, topic_imei: Option<&str>) -> Result<String, DecodeError> {
    let provided = provided.map(str::trim).filter(|s| !s.is_empty());
    let imei = match (provided, topic_imei) {
        (Some(p), Some(t)) => {
            if p != t {
                tracing::warn!(
                    "Payload deviceImei={} does not match topic imei={}, using payload value",
                    p,
                    t
                );
            }
            p
        }
        (Some(p), None) => p,
        (None, Some(t)) => t,
        (None, None) => return Err(DecodeError::MissingImei),
    };

    if !is_valid_imei(imei) {
        return Err(DecodeError::MalformedImei(imei.to_string()));
    }
    Ok(imei.to_string())
}

fn from_json(payload: TelemetryPayload, topic_imei: Option<&str>) -> Result<IncomingReading, DecodeError> {
    let imei = resolve_imei(payload.device_imei.as_deref(), topic_imei)?;

    let timestamp = match payload.timestamp {
        Some(RawTimestamp::Text(text)) => parse_timestamp(&text)?,
        Some(RawTimestamp::Epoch(value)) => epoch_to_utc(value)?,
        None => return Err(DecodeError::MissingField("timestamp")),
    };

    let position = payload.position.ok_or(DecodeError::MissingField("position"))?;
    let latitude = position.latitude.ok_or(DecodeError::MissingField("position.latitude"))?;
    let longitude = position.longitude.ok_or(DecodeError::MissingField("position.longitude"))?;

    let collar_status = payload
        .status_collar
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<CollarStatus>().map_err(|_| DecodeError::invalid("statusCollar", s)))
        .transpose()?;
    let transmission_status = payload
        .transmission_status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<TransmissionStatus>()
                .map_err(|_| DecodeError::invalid("transmissionStatus", s))
        })
        .transpose()?;

    let gsm_signal = payload
        .gsm_signal
        .map(|v| i32::try_from(v).map_err(|_| DecodeError::invalid("gsmSignal", v)))
        .transpose()?;

    validated(IncomingReading {
        imei,
        timestamp,
        position: GeoPoint::new(latitude, longitude),
        speed: payload.speed,
        accel_x: payload.accel_x,
        accel_y: payload.accel_y,
        accel_z: payload.accel_z,
        pressure: payload.pressure,
        battery_level: battery_level(payload.battery_level)?,
        gsm_signal,
        collar_status,
        transmission_status,
    })
}

fn from_frame(frame: CollarFrame, topic_imei: Option<&str>) -> Result<IncomingReading, DecodeError> {
    let imei = resolve_imei(Some(frame.device_imei.as_str()), topic_imei)?;
    if frame.timestamp_ms == 0 {
        return Err(DecodeError::MissingField("timestamp"));
    }
    let timestamp = Utc
        .timestamp_millis_opt(frame.timestamp_ms)
        .single()
        .ok_or_else(|| DecodeError::InvalidTimestamp(frame.timestamp_ms.to_string()))?;

    let collar_status = match frame.collar_status.map(CollarStatusCode::try_from) {
        None | Some(Ok(CollarStatusCode::Unspecified)) => None,
        Some(Ok(CollarStatusCode::Active)) => Some(CollarStatus::Active),
        Some(Ok(CollarStatusCode::Inactive)) => Some(CollarStatus::Inactive),
        Some(Ok(CollarStatusCode::Stolen)) => Some(CollarStatus::Stolen),
        Some(Ok(CollarStatusCode::Destroyed)) => Some(CollarStatus::Destroyed),
        Some(Err(_)) => {
            return Err(DecodeError::invalid("collar_status", frame.collar_status.unwrap_or_default()))
        }
    };
    let transmission_status = match frame.transmission_status.map(TransmissionCode::try_from) {
        None | Some(Ok(TransmissionCode::Unspecified)) => None,
        Some(Ok(TransmissionCode::Sent)) => Some(TransmissionStatus::Sent),
        Some(Ok(TransmissionCode::Pending)) => Some(TransmissionStatus::Pending),
        Some(Ok(TransmissionCode::Failed)) => Some(TransmissionStatus::Failed),
        Some(Err(_)) => {
            return Err(DecodeError::invalid(
                "transmission_status",
                frame.transmission_status.unwrap_or_default(),
            ))
        }
    };

    validated(IncomingReading {
        imei,
        timestamp,
        position: GeoPoint::new(frame.latitude, frame.longitude),
        speed: frame.speed,
        accel_x: frame.accel_x,
        accel_y: frame.accel_y,
        accel_z: frame.accel_z,
        pressure: frame.pressure,
        battery_level: battery_level(frame.battery_level.map(i64::from))?,
        gsm_signal: frame.gsm_signal,
        collar_status,
        transmission_status,
    })
}

fn validated(reading: IncomingReading) -> Result<IncomingReading, DecodeError> {
    if !reading.position.is_valid() {
        return Err(DecodeError::invalid(
            "position",
            format!("{}, {}", reading.position.latitude, reading.position.longitude),
        ));
    }
    if let Some(speed) = reading.speed {
        if !speed.is_finite() || speed < 0.0 {
            return Err(DecodeError::invalid("speed", speed));
        }
    }
    if let Some(pressure) = reading.pressure {
        if !(0.0..=1.0).contains(&pressure) {
            return Err(DecodeError::invalid("pressure", pressure));
        }
    }
    for (field, value) in [
        ("accelX", reading.accel_x),
        ("accelY", reading.accel_y),
        ("accelZ", reading.accel_z),
    ] {
        if let Some(v) = value.filter(|v| !v.is_finite()) {
            return Err(DecodeError::invalid(field, v));
        }
    }
    Ok(reading)
}

fn battery_level(raw: Option<i64>) -> Result<Option<u8>, DecodeError> {
    match raw {
        None => Ok(None),
        Some(v) if (0..=100).contains(&v) => Ok(Some(v as u8)),
        Some(v) => Err(DecodeError::invalid("batteryLevel", v)),
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DecodeError> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    // Some firmwares omit the offset; those clocks run on UTC.
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| DecodeError::InvalidTimestamp(text.to_string()))
}

fn epoch_to_utc(value: i64) -> Result<DateTime<Utc>, DecodeError> {
    // Values below 1e11 cannot be millisecond timestamps after 1973.
    let parsed = if value.abs() < 100_000_000_000 {
        Utc.timestamp_opt(value, 0).single()
    } else {
        Utc.timestamp_millis_opt(value).single()
    };
    parsed.ok_or_else(|| DecodeError::InvalidTimestamp(value.to_string()))
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        Int(i64),
        String(String),
    }

    let v: Option<StringOrInt> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrInt::Int(i)) => Ok(Some(i)),
        Some(StringOrInt::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<i64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_collar_payload_with_string_numbers() {
        let payload = r#"
        {
            "deviceImei": "356938035643809",
            "timestamp": "2025-11-29T06:15:15Z",
            "position": { "latitude": "+14.692778", "longitude": "-17.446667" },
            "speed": "1.25",
            "accelX": 0.01,
            "accelY": "",
            "pressure": "0.85",
            "batteryLevel": "76",
            "gsmSignal": 18,
            "statusCollar": "ACTIVE"
        }
        "#;

        let reading = decode_payload(payload.as_bytes(), None).unwrap();
        assert_eq!(reading.imei, "356938035643809");
        assert_eq!(reading.position, GeoPoint::new(14.692778, -17.446667));
        assert_eq!(reading.speed, Some(1.25));
        assert_eq!(reading.accel_x, Some(0.01));
        assert_eq!(reading.accel_y, None);
        assert_eq!(reading.accel_z, None);
        assert_eq!(reading.pressure, Some(0.85));
        assert_eq!(reading.battery_level, Some(76));
        assert_eq!(reading.gsm_signal, Some(18));
        assert_eq!(reading.collar_status, Some(CollarStatus::Active));
        assert_eq!(reading.transmission_status, None);
        assert_eq!(reading.timestamp.to_rfc3339(), "2025-11-29T06:15:15+00:00");
    }

    #[test]
    fn naive_and_epoch_timestamps_are_utc() {
        let naive = br#"{"deviceImei":"356938035643809","timestamp":"2025-11-29 06:15:15",
            "position":{"latitude":14.0,"longitude":-17.0}}"#;
        let epoch = br#"{"deviceImei":"356938035643809","timestamp":1764396915,
            "position":{"latitude":14.0,"longitude":-17.0}}"#;
        let a = decode_payload(naive, None).unwrap();
        let b = decode_payload(epoch, None).unwrap();
        assert_eq!(a.timestamp, b.timestamp);
    }

    #[test]
    fn imei_is_taken_from_topic_when_payload_omits_it() {
        let payload = br#"{"timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0}}"#;
        let reading = decode_payload(payload, Some("farm/collars/356938035643809/telemetry")).unwrap();
        assert_eq!(reading.imei, "356938035643809");
    }

    #[test]
    fn payload_imei_wins_over_topic() {
        let payload = br#"{"deviceImei":"111111111111111","timestamp":"2025-11-29T06:15:15Z",
            "position":{"latitude":14.0,"longitude":-17.0}}"#;
        let reading = decode_payload(payload, Some("collars/356938035643809/telemetry")).unwrap();
        assert_eq!(reading.imei, "111111111111111");
    }

    #[test]
    fn topic_extraction_requires_collars_imei_telemetry_shape() {
        assert_eq!(imei_from_topic("collars/356938035643809/telemetry"), Some("356938035643809"));
        assert_eq!(imei_from_topic("a/b/collars/356938035643809/telemetry/x"), Some("356938035643809"));
        assert_eq!(imei_from_topic("collars/35693803564380/telemetry"), None);
        assert_eq!(imei_from_topic("collars/356938035643809/status"), None);
        assert_eq!(imei_from_topic("telemetry"), None);
    }

    #[test]
    fn rejects_missing_and_malformed_imei() {
        let missing = br#"{"timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0}}"#;
        assert!(matches!(decode_payload(missing, None), Err(DecodeError::MissingImei)));

        let short = br#"{"deviceImei":"12345","timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0}}"#;
        assert!(matches!(decode_payload(short, None), Err(DecodeError::MalformedImei(_))));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let lat = br#"{"deviceImei":"356938035643809","timestamp":"2025-11-29T06:15:15Z","position":{"latitude":91.0,"longitude":-17.0}}"#;
        assert!(matches!(
            decode_payload(lat, None),
            Err(DecodeError::InvalidField { field: "position", .. })
        ));

        let battery = br#"{"deviceImei":"356938035643809","timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0},"batteryLevel":140}"#;
        assert!(matches!(
            decode_payload(battery, None),
            Err(DecodeError::InvalidField { field: "batteryLevel", .. })
        ));

        let speed = br#"{"deviceImei":"356938035643809","timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0},"speed":-2}"#;
        assert!(matches!(
            decode_payload(speed, None),
            Err(DecodeError::InvalidField { field: "speed", .. })
        ));
    }

    #[test]
    fn rejects_unknown_collar_status_and_missing_timestamp() {
        let status = br#"{"deviceImei":"356938035643809","timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0},"statusCollar":"LOST"}"#;
        assert!(decode_payload(status, None).is_err());

        let no_ts = br#"{"deviceImei":"356938035643809","position":{"latitude":14.0,"longitude":-17.0}}"#;
        assert!(matches!(
            decode_payload(no_ts, None),
            Err(DecodeError::MissingField("timestamp"))
        ));
    }

    #[test]
    fn decodes_protobuf_frame() {
        let frame = CollarFrame {
            device_imei: "356938035643809".to_string(),
            timestamp_ms: 1_764_396_915_000,
            latitude: 14.5,
            longitude: -16.5,
            speed: Some(20.0),
            accel_x: None,
            accel_y: None,
            accel_z: None,
            pressure: Some(0.1),
            battery_level: Some(18),
            gsm_signal: None,
            collar_status: Some(CollarStatusCode::Stolen as i32),
            transmission_status: None,
        };

        let reading = decode_payload(&frame.encode_to_vec(), None).unwrap();
        assert_eq!(reading.imei, "356938035643809");
        assert_eq!(reading.timestamp.timestamp(), 1_764_396_915);
        assert_eq!(reading.speed, Some(20.0));
        assert_eq!(reading.battery_level, Some(18));
        assert_eq!(reading.collar_status, Some(CollarStatus::Stolen));
    }

    #[test]
    fn garbage_is_a_decode_error_not_a_panic() {
        assert!(decode_payload(b"{not json", None).is_err());
        assert!(decode_payload(&[0xff, 0xff, 0xff, 0x01], None).is_err());
    }

    #[test]
    fn missing_transmission_status_defaults_to_sent() {
        let payload = br#"{"deviceImei":"356938035643809","timestamp":"2025-11-29T06:15:15Z","position":{"latitude":14.0,"longitude":-17.0}}"#;
        let device = Device {
            id: uuid::Uuid::new_v4(),
            imei: "356938035643809".to_string(),
            collar_status: CollarStatus::Active,
            animal_id: None,
        };
        let reading = decode_payload(payload, None).unwrap().into_reading(&device);
        assert_eq!(reading.transmission_status, TransmissionStatus::Sent);
        assert_eq!(reading.device_id, device.id);
    }
}
