use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Wire format
//
// The external store keeps one JSON document per terrarium and uses Spanish
// keys throughout:
//
//   {
//     "id": "7",
//     "nombre": "Gecko tank",
//     "estado": true,
//     "sensorAmbiente": [ { "temperatura": "25.1", "humedad": "61.0", "activo": true, "fecha": "..." } ],
//     "lamparaUV":      [ { "encendido": true, "ultimaEncendido": "...", "ultimaApagado": null, "fecha": "..." } ],
//     "humidificador":  [ ... ],
//     "fecha": "..."
//   }
//
// Every list is newest-first. Fields the dashboard never wrote (older records,
// hand-edited rows) may be absent, null or of the wrong type, so all of them
// fall back to defaults instead of rejecting the record. Keys this model does
// not know about (`createdAt`, fields of other clients) are carried through a
// full replace untouched.
// ---------------------------------------------------------------------------

/// Temperature value marking a reading that carries no real measurement yet.
pub const COLD_START_SENTINEL: &str = "0.0";

/// Selects one of the three time-series lists of a [`Terrarium`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKey {
    Sensor,
    Lamp,
    Humidifier,
}

impl SeriesKey {
    /// Key of the list inside the stored document.
    pub fn wire_key(self) -> &'static str {
        match self {
            SeriesKey::Sensor => "sensorAmbiente",
            SeriesKey::Lamp => "lamparaUV",
            SeriesKey::Humidifier => "humidificador",
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeriesKey::Sensor => "sensor",
            SeriesKey::Lamp => "lamp",
            SeriesKey::Humidifier => "humidifier",
        };
        f.write_str(s)
    }
}

/// The two switchable devices of a terrarium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Lamp,
    Humidifier,
}

impl From<Device> for SeriesKey {
    fn from(device: Device) -> Self {
        match device {
            Device::Lamp => SeriesKey::Lamp,
            Device::Humidifier => SeriesKey::Humidifier,
        }
    }
}

impl TryFrom<SeriesKey> for Device {
    type Error = SeriesKey;

    fn try_from(key: SeriesKey) -> Result<Self, Self::Error> {
        match key {
            SeriesKey::Lamp => Ok(Device::Lamp),
            SeriesKey::Humidifier => Ok(Device::Humidifier),
            SeriesKey::Sensor => Err(key),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SeriesKey::from(*self).fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Terrarium
// ---------------------------------------------------------------------------

/// A monitored enclosure and its bounded device/sensor history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Terrarium {
    /// Assigned by the store. Empty until the record has been created.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(rename = "nombre", default, deserialize_with = "lenient_string")]
    pub name: String,

    /// Whether the global simulation advances this terrarium.
    #[serde(rename = "estado", default, deserialize_with = "flag_or_false")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(rename = "especie", default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,

    #[serde(rename = "sensorAmbiente", default)]
    pub sensor_readings: Vec<SensorReading>,

    #[serde(rename = "lamparaUV", default)]
    pub lamp_events: Vec<DeviceEvent>,

    #[serde(rename = "humidificador", default)]
    pub humidifier_events: Vec<DeviceEvent>,

    #[serde(
        rename = "fecha",
        default,
        deserialize_with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,

    /// Stored keys with no field above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Terrarium {
    /// Most recent sensor reading, if any.
    pub fn latest_sensor(&self) -> Option<&SensorReading> {
        self.sensor_readings.first()
    }

    pub fn device_events(&self, device: Device) -> &[DeviceEvent] {
        match device {
            Device::Lamp => &self.lamp_events,
            Device::Humidifier => &self.humidifier_events,
        }
    }

    pub fn device_events_mut(&mut self, device: Device) -> &mut Vec<DeviceEvent> {
        match device {
            Device::Lamp => &mut self.lamp_events,
            Device::Humidifier => &mut self.humidifier_events,
        }
    }

    /// Most recent event for `device`, if any.
    pub fn latest_event(&self, device: Device) -> Option<&DeviceEvent> {
        self.device_events(device).first()
    }

    /// Current switch state of `device`; a device with no history is off.
    pub fn device_on(&self, device: Device) -> bool {
        self.latest_event(device).is_some_and(|e| e.on)
    }

    /// Number of entries in the list selected by `key`.
    pub fn series_len(&self, key: SeriesKey) -> usize {
        match key {
            SeriesKey::Sensor => self.sensor_readings.len(),
            SeriesKey::Lamp => self.lamp_events.len(),
            SeriesKey::Humidifier => self.humidifier_events.len(),
        }
    }

    /// SHA-256 of the serialized record, hex encoded.
    ///
    /// Two reads of the same terrarium yield the same fingerprint only if no
    /// write landed in between.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

// ---------------------------------------------------------------------------
// SensorReading
// ---------------------------------------------------------------------------

/// One ambient sensor sample.
///
/// Values are kept as the one-decimal strings the dashboard has always
/// written (`"25.3"`); the store occasionally returns bare numbers, which are
/// normalised on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorReading {
    /// Degrees Celsius, one decimal.
    #[serde(rename = "temperatura", default, deserialize_with = "decimal_string")]
    pub temperature: String,

    /// Relative humidity percentage, one decimal.
    #[serde(rename = "humedad", default, deserialize_with = "decimal_string")]
    pub humidity: String,

    #[serde(rename = "activo", default = "default_true", deserialize_with = "flag_or_true")]
    pub active: bool,

    /// The Unix epoch when the stored value is missing or unreadable.
    #[serde(rename = "fecha", default, deserialize_with = "timestamp_or_epoch")]
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(temperature: f64, humidity: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            temperature: format!("{temperature:.1}"),
            humidity: format!("{humidity:.1}"),
            active: true,
            timestamp,
        }
    }

    /// The "not yet initialised" placeholder reading.
    pub fn cold_start(timestamp: DateTime<Utc>) -> Self {
        Self {
            temperature: COLD_START_SENTINEL.to_owned(),
            humidity: COLD_START_SENTINEL.to_owned(),
            active: true,
            timestamp,
        }
    }

    pub fn is_cold_start(&self) -> bool {
        self.temperature == COLD_START_SENTINEL
    }

    /// Parsed temperature, `None` if the stored string is not a finite number.
    pub fn temperature_celsius(&self) -> Option<f64> {
        parse_finite(&self.temperature)
    }

    /// Parsed humidity, `None` if the stored string is not a finite number.
    pub fn humidity_pct(&self) -> Option<f64> {
        parse_finite(&self.humidity)
    }
}

// ---------------------------------------------------------------------------
// DeviceEvent
// ---------------------------------------------------------------------------

/// One switch event of the UV lamp or the humidifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceEvent {
    #[serde(rename = "encendido", default, deserialize_with = "flag_or_false")]
    pub on: bool,

    #[serde(rename = "ultimaEncendido", default, deserialize_with = "optional_timestamp")]
    pub last_turned_on: Option<DateTime<Utc>>,

    #[serde(rename = "ultimaApagado", default, deserialize_with = "optional_timestamp")]
    pub last_turned_off: Option<DateTime<Utc>>,

    #[serde(rename = "fecha", default, deserialize_with = "timestamp_or_epoch")]
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    /// Initial "off" entry written when a terrarium is created.
    pub fn placeholder_off(now: DateTime<Utc>) -> Self {
        Self {
            on: false,
            last_turned_on: None,
            last_turned_off: Some(now),
            timestamp: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Display metadata for a terrarium about to be created.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewTerrarium {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    pub avatar: Option<String>,
    pub color: Option<String>,
    pub species: Option<String>,
}

impl NewTerrarium {
    /// Build the full record posted to the store: empty sensor history and
    /// one placeholder "off" event per device.
    pub fn into_record(self, now: DateTime<Utc>) -> Terrarium {
        Terrarium {
            id: String::new(),
            name: self.name,
            active: self.active,
            avatar: self.avatar,
            color: self.color,
            species: self.species,
            sensor_readings: Vec::new(),
            lamp_events: vec![DeviceEvent::placeholder_off(now)],
            humidifier_events: vec![DeviceEvent::placeholder_off(now)],
            updated_at: Some(now),
            extra: BTreeMap::new(),
        }
    }
}

/// Partial update of top-level scalar fields. List fields are never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrariumPatch {
    #[serde(rename = "nombre", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "estado", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(rename = "especie", skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,

    #[serde(rename = "fecha", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TerrariumPatch {
    /// Mark the terrarium active and bump its timestamp.
    pub fn touch_active(now: DateTime<Utc>) -> Self {
        Self {
            active: Some(true),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Merge the present fields into `terrarium`.
    pub fn apply_to(&self, terrarium: &mut Terrarium) {
        if let Some(name) = &self.name {
            terrarium.name = name.clone();
        }
        if let Some(active) = self.active {
            terrarium.active = active;
        }
        if let Some(avatar) = &self.avatar {
            terrarium.avatar = Some(avatar.clone());
        }
        if let Some(color) = &self.color {
            terrarium.color = Some(color.clone());
        }
        if let Some(species) = &self.species {
            terrarium.species = Some(species.clone());
        }
        if let Some(updated_at) = self.updated_at {
            terrarium.updated_at = Some(updated_at);
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

/// Store values arrive as strings, numbers or null depending on who wrote them.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<Scalar>::deserialize(d)? {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

fn decimal_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<Scalar>::deserialize(d)? {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Number(n)) => match n.as_f64() {
            Some(v) => format!("{v:.1}"),
            None => n.to_string(),
        },
        None => String::new(),
    })
}

fn default_true() -> bool {
    true
}

/// `true`/`false`, `"true"`/`"false"` or a number; anything else is `None`.
fn flag(value: serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(b),
        serde_json::Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

fn flag_or_false<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(flag(serde_json::Value::deserialize(d)?).unwrap_or(false))
}

fn flag_or_true<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(flag(serde_json::Value::deserialize(d)?).unwrap_or(true))
}

/// RFC 3339 string, or `None` for null, other types and other formats.
fn optional_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    })
}

fn timestamp_or_epoch<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    Ok(optional_timestamp(d)?.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_record() -> &'static str {
        r#"{
            "id": "7",
            "nombre": "Gecko tank",
            "estado": true,
            "avatar": "🦎",
            "sensorAmbiente": [
                {"temperatura": "25.1", "humedad": "61.0", "activo": true, "fecha": "2025-09-18T20:10:00.000Z"},
                {"temperatura": 24, "humedad": 60.5, "activo": true, "fecha": "2025-09-18T19:40:00.000Z"}
            ],
            "lamparaUV": [
                {"encendido": true, "ultimaEncendido": "2025-09-18T20:00:00.000Z", "ultimaApagado": null, "fecha": "2025-09-18T20:00:00.000Z"}
            ],
            "fecha": "2025-09-18T20:10:00.000Z"
        }"#
    }

    #[test]
    fn deserializes_stored_record() {
        let t: Terrarium = serde_json::from_str(stored_record()).unwrap();
        assert_eq!(t.id, "7");
        assert_eq!(t.name, "Gecko tank");
        assert!(t.active);
        assert_eq!(t.sensor_readings.len(), 2);
        assert_eq!(t.sensor_readings[0].temperature, "25.1");
        assert!(t.device_on(Device::Lamp));
        // Missing list falls back to empty.
        assert!(t.humidifier_events.is_empty());
        assert!(!t.device_on(Device::Humidifier));
    }

    #[test]
    fn numeric_values_are_normalised_to_one_decimal() {
        let t: Terrarium = serde_json::from_str(stored_record()).unwrap();
        assert_eq!(t.sensor_readings[1].temperature, "24.0");
        assert_eq!(t.sensor_readings[1].humidity, "60.5");
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = r#"{"id": "1", "nombre": "x", "estado": true, "createdAt": 1726000000, "notas": "keep me"}"#;
        let t: Terrarium = serde_json::from_str(raw).unwrap();
        assert_eq!(t.extra.len(), 2);

        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["createdAt"], 1726000000);
        assert_eq!(v["notas"], "keep me");
        assert_eq!(v["nombre"], "x");
        assert!(v.get("extra").is_none());
    }

    #[test]
    fn malformed_entries_fall_back_to_defaults() {
        let raw = r#"{
            "id": "3",
            "nombre": null,
            "estado": "true",
            "fecha": 17,
            "sensorAmbiente": [
                {"temperatura": "25.1", "humedad": "61.0", "activo": null, "fecha": null},
                {"temperatura": "24.0", "humedad": "60.0", "activo": "no", "fecha": "18/09/2025 20:10"}
            ],
            "lamparaUV": [
                {"encendido": null, "ultimaEncendido": "yesterday", "ultimaApagado": 5, "fecha": "2025-09-18T20:00:00.000Z"}
            ],
            "humidificador": [
                {"encendido": 1, "fecha": null}
            ]
        }"#;
        let t: Terrarium = serde_json::from_str(raw).unwrap();
        assert_eq!(t.name, "");
        assert!(t.active);
        assert_eq!(t.updated_at, None);

        assert!(t.sensor_readings[0].active);
        assert_eq!(t.sensor_readings[0].timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert!(t.sensor_readings[1].active);
        assert_eq!(t.sensor_readings[1].timestamp, DateTime::<Utc>::UNIX_EPOCH);

        let lamp = &t.lamp_events[0];
        assert!(!lamp.on);
        assert_eq!(lamp.last_turned_on, None);
        assert_eq!(lamp.last_turned_off, None);
        assert_ne!(lamp.timestamp, DateTime::<Utc>::UNIX_EPOCH);

        assert!(t.device_on(Device::Humidifier));
    }

    #[test]
    fn numeric_id_is_accepted() {
        let t: Terrarium = serde_json::from_str(r#"{"id": 12, "nombre": "x"}"#).unwrap();
        assert_eq!(t.id, "12");
    }

    #[test]
    fn serializes_with_store_keys() {
        let t: Terrarium = serde_json::from_str(stored_record()).unwrap();
        let v = serde_json::to_value(&t).unwrap();
        assert!(v.get("sensorAmbiente").is_some());
        assert!(v.get("lamparaUV").is_some());
        assert!(v.get("humidificador").is_some());
        assert_eq!(v["nombre"], "Gecko tank");
        assert_eq!(v["lamparaUV"][0]["ultimaApagado"], serde_json::Value::Null);
    }

    #[test]
    fn unparseable_values_yield_none() {
        let r = SensorReading {
            temperature: "--".to_owned(),
            humidity: "NaN".to_owned(),
            active: true,
            timestamp: Utc::now(),
        };
        assert_eq!(r.temperature_celsius(), None);
        assert_eq!(r.humidity_pct(), None);
    }

    #[test]
    fn cold_start_reading_is_detected() {
        let r = SensorReading::cold_start(Utc::now());
        assert!(r.is_cold_start());
        assert_eq!(r.humidity, "0.0");
        assert!(!SensorReading::new(25.0, 60.0, Utc::now()).is_cold_start());
    }

    #[test]
    fn new_terrarium_starts_with_placeholders() {
        let now = Utc::now();
        let t = NewTerrarium {
            name: "Frog".to_owned(),
            active: false,
            avatar: None,
            color: None,
            species: None,
        }
        .into_record(now);
        assert!(t.sensor_readings.is_empty());
        assert_eq!(t.lamp_events, vec![DeviceEvent::placeholder_off(now)]);
        assert_eq!(t.humidifier_events.len(), 1);
        assert!(t.id.is_empty());
        let v = serde_json::to_value(&t).unwrap();
        assert!(v.get("id").is_none(), "unsaved records are posted without an id");
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut t: Terrarium = serde_json::from_str(stored_record()).unwrap();
        t.active = false;
        let now = Utc::now();
        TerrariumPatch::touch_active(now).apply_to(&mut t);
        assert!(t.active);
        assert_eq!(t.updated_at, Some(now));
        assert_eq!(t.name, "Gecko tank");
        assert_eq!(t.sensor_readings.len(), 2);

        let body = serde_json::to_value(TerrariumPatch::touch_active(now)).unwrap();
        let keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let mut t: Terrarium = serde_json::from_str(stored_record()).unwrap();
        let before = t.fingerprint().unwrap();
        assert_eq!(before, t.fingerprint().unwrap());
        assert_eq!(before.len(), 64);
        t.sensor_readings.remove(0);
        assert_ne!(before, t.fingerprint().unwrap());
    }

    #[test]
    fn device_and_series_key_conversions() {
        assert_eq!(SeriesKey::from(Device::Lamp), SeriesKey::Lamp);
        assert_eq!(Device::try_from(SeriesKey::Humidifier), Ok(Device::Humidifier));
        assert_eq!(Device::try_from(SeriesKey::Sensor), Err(SeriesKey::Sensor));
        assert_eq!(SeriesKey::Lamp.wire_key(), "lamparaUV");
        assert_eq!(Device::Humidifier.to_string(), "humidifier");
    }
}
