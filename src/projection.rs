//! Read-only views derived from a fetched terrarium record.
//!
//! Everything here is a pure function of the record (plus the standards for
//! the control panel), so the polling loops and the HTTP handlers share it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    standards::{Advisory, Standards, HUM_TARGET},
    store::models::{Device, DeviceEvent, SensorReading, SeriesKey, Terrarium},
};

/// Shown wherever a value is missing or cannot be parsed.
pub const PLACEHOLDER: &str = "--";
/// Entries returned by [`get_recent`] when the caller gives no limit, and the
/// window used by the monitor charts.
pub const RECENT_LIMIT: usize = 10;
/// Rows on the first page of the history table.
pub const HISTORY_PAGE: usize = 10;

pub const DEFAULT_AVATAR: &str = "🦎";
pub const DEFAULT_COLOR: &str = "#2E8B57";

/// Temperature that fills the list-view gauge.
const GAUGE_FULL_SCALE: f64 = 40.0;
/// Deviation from the ideal temperature that empties the comfort gauge.
const COMFORT_MAX_DEVIATION: f64 = 10.0;

// ---------------------------------------------------------------------------
// Series access
// ---------------------------------------------------------------------------

/// One entry of any of the three series.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum SeriesEntry {
    Sensor(SensorReading),
    Device(DeviceEvent),
}

/// Newest entry of `series`, `None` if the list is empty.
pub fn get_latest(terrarium: &Terrarium, series: SeriesKey) -> Option<SeriesEntry> {
    get_recent(terrarium, series, 1).into_iter().next()
}

/// Up to `limit` newest entries of `series`, newest first.
pub fn get_recent(terrarium: &Terrarium, series: SeriesKey, limit: usize) -> Vec<SeriesEntry> {
    match series {
        SeriesKey::Sensor => terrarium
            .sensor_readings
            .iter()
            .take(limit)
            .cloned()
            .map(SeriesEntry::Sensor)
            .collect(),
        SeriesKey::Lamp => recent_events(terrarium, Device::Lamp, limit),
        SeriesKey::Humidifier => recent_events(terrarium, Device::Humidifier, limit),
    }
}

fn recent_events(terrarium: &Terrarium, device: Device, limit: usize) -> Vec<SeriesEntry> {
    terrarium
        .device_events(device)
        .iter()
        .take(limit)
        .cloned()
        .map(SeriesEntry::Device)
        .collect()
}

/// Latest sensor values as display strings, `"--"` when absent.
fn display_values(terrarium: &Terrarium) -> (String, String) {
    match terrarium.latest_sensor() {
        Some(r) => (
            non_empty_or_placeholder(&r.temperature),
            non_empty_or_placeholder(&r.humidity),
        ),
        None => (PLACEHOLDER.to_owned(), PLACEHOLDER.to_owned()),
    }
}

fn non_empty_or_placeholder(value: &str) -> String {
    if value.trim().is_empty() {
        PLACEHOLDER.to_owned()
    } else {
        value.to_owned()
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// List view
// ---------------------------------------------------------------------------

/// One card of the terrarium list.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TerrariumSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub avatar: String,
    pub color: String,
    pub species: Option<String>,
    pub temperature: String,
    pub humidity: String,
    pub lamp_on: bool,
    pub humidifier_on: bool,
    /// Latest temperature as a share of 40 °C, capped at 100.
    pub temperature_gauge_pct: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn summarize(terrarium: &Terrarium) -> TerrariumSummary {
    let (temperature, humidity) = display_values(terrarium);
    let gauge = terrarium
        .latest_sensor()
        .and_then(SensorReading::temperature_celsius)
        .map(|t| (t / GAUGE_FULL_SCALE * 100.0).clamp(0.0, 100.0))
        .unwrap_or(0.0);

    TerrariumSummary {
        id: terrarium.id.clone(),
        name: terrarium.name.clone(),
        active: terrarium.active,
        avatar: terrarium
            .avatar
            .clone()
            .unwrap_or_else(|| DEFAULT_AVATAR.to_owned()),
        color: terrarium
            .color
            .clone()
            .unwrap_or_else(|| DEFAULT_COLOR.to_owned()),
        species: terrarium.species.clone(),
        temperature,
        humidity,
        lamp_on: terrarium.device_on(Device::Lamp),
        humidifier_on: terrarium.device_on(Device::Humidifier),
        temperature_gauge_pct: round1(gauge),
        updated_at: terrarium.updated_at,
    }
}

// ---------------------------------------------------------------------------
// Control view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ControlPanel {
    pub terrarium_id: String,
    pub name: String,
    pub active: bool,
    pub temperature: String,
    pub humidity: String,
    pub humidity_target: f64,
    pub latest_reading: Option<SensorReading>,
    pub lamp: Option<DeviceEvent>,
    pub humidifier: Option<DeviceEvent>,
    pub lamp_on: bool,
    pub humidifier_on: bool,
    /// Every condition the latest reading violates.
    pub advisories: Vec<Advisory>,
    /// Advisories that became visible on this refresh. Only a polling view
    /// keeps the state needed to fill this in.
    pub announced: Vec<Advisory>,
}

pub fn control_panel(terrarium: &Terrarium, standards: &Standards) -> ControlPanel {
    let (temperature, humidity) = display_values(terrarium);
    let advisories = terrarium
        .latest_sensor()
        .map(|r| standards.evaluate_reading(r))
        .unwrap_or_default();

    ControlPanel {
        terrarium_id: terrarium.id.clone(),
        name: terrarium.name.clone(),
        active: terrarium.active,
        temperature,
        humidity,
        humidity_target: HUM_TARGET,
        latest_reading: terrarium.latest_sensor().cloned(),
        lamp: terrarium.latest_event(Device::Lamp).cloned(),
        humidifier: terrarium.latest_event(Device::Humidifier).cloned(),
        lamp_on: terrarium.device_on(Device::Lamp),
        humidifier_on: terrarium.device_on(Device::Humidifier),
        advisories,
        announced: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Monitor view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    /// Unparseable values plot as 0.
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComfortLevel {
    Optimal,
    Warning,
    Danger,
}

/// How close the latest temperature is to the middle of the standard range.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ComfortGauge {
    pub temperature: f64,
    pub ideal: f64,
    /// 0 at the ideal, 100 at ten degrees away or more.
    pub deviation_pct: f64,
    /// `100 - deviation_pct`.
    pub comfort_pct: f64,
    pub level: ComfortLevel,
}

impl ComfortGauge {
    pub fn new(temperature: f64, standards: &Standards) -> Self {
        let ideal = standards.ideal_temperature();
        let deviation = ((temperature - ideal).abs() / COMFORT_MAX_DEVIATION * 100.0).min(100.0);
        let level = if deviation < 20.0 {
            ComfortLevel::Optimal
        } else if deviation < 40.0 {
            ComfortLevel::Warning
        } else {
            ComfortLevel::Danger
        };
        Self {
            temperature,
            ideal,
            deviation_pct: round1(deviation),
            comfort_pct: round1((100.0 - deviation).max(0.0)),
            level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeviceTimelineEntry {
    pub device: Device,
    pub on: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonitorCharts {
    pub terrarium_id: String,
    pub name: String,
    /// Last readings, oldest first.
    pub readings: Vec<ChartPoint>,
    /// `None` until the terrarium has at least one reading.
    pub gauge: Option<ComfortGauge>,
    /// Last switch events of both devices merged, oldest first.
    pub device_timeline: Vec<DeviceTimelineEntry>,
    pub sensor_log: Vec<SensorReading>,
    pub lamp_log: Vec<DeviceEvent>,
    pub humidifier_log: Vec<DeviceEvent>,
}

pub fn monitor_charts(terrarium: &Terrarium, standards: &Standards) -> MonitorCharts {
    let sensor_log: Vec<SensorReading> = terrarium
        .sensor_readings
        .iter()
        .take(RECENT_LIMIT)
        .cloned()
        .collect();
    let lamp_log: Vec<DeviceEvent> = terrarium
        .lamp_events
        .iter()
        .take(RECENT_LIMIT)
        .cloned()
        .collect();
    let humidifier_log: Vec<DeviceEvent> = terrarium
        .humidifier_events
        .iter()
        .take(RECENT_LIMIT)
        .cloned()
        .collect();

    let readings: Vec<ChartPoint> = sensor_log
        .iter()
        .rev()
        .map(|r| ChartPoint {
            timestamp: r.timestamp,
            temperature: r.temperature_celsius().unwrap_or(0.0),
            humidity: r.humidity_pct().unwrap_or(0.0),
        })
        .collect();
    let gauge = readings
        .last()
        .map(|p| ComfortGauge::new(p.temperature, standards));

    let mut device_timeline: Vec<DeviceTimelineEntry> = lamp_log
        .iter()
        .map(|e| (Device::Lamp, e))
        .chain(humidifier_log.iter().map(|e| (Device::Humidifier, e)))
        .map(|(device, e)| DeviceTimelineEntry {
            device,
            on: e.on,
            timestamp: e.timestamp,
        })
        .collect();
    device_timeline.sort_by_key(|e| e.timestamp);
    let excess = device_timeline.len().saturating_sub(RECENT_LIMIT);
    let device_timeline = device_timeline.split_off(excess);

    MonitorCharts {
        terrarium_id: terrarium.id.clone(),
        name: terrarium.name.clone(),
        readings,
        gauge,
        device_timeline,
        sensor_log,
        lamp_log,
        humidifier_log,
    }
}

// ---------------------------------------------------------------------------
// History view
// ---------------------------------------------------------------------------

/// One row of the merged history table. Exactly one group of columns is
/// filled, depending on `series`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub series: SeriesKey,
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub lamp_on: Option<bool>,
    pub humidifier_on: Option<bool>,
}

impl HistoryRow {
    fn sensor(r: &SensorReading) -> Self {
        Self {
            timestamp: r.timestamp,
            series: SeriesKey::Sensor,
            temperature: Some(r.temperature.clone()),
            humidity: Some(r.humidity.clone()),
            lamp_on: None,
            humidifier_on: None,
        }
    }

    fn device(device: Device, e: &DeviceEvent) -> Self {
        let (lamp_on, humidifier_on) = match device {
            Device::Lamp => (Some(e.on), None),
            Device::Humidifier => (None, Some(e.on)),
        };
        Self {
            timestamp: e.timestamp,
            series: device.into(),
            temperature: None,
            humidity: None,
            lamp_on,
            humidifier_on,
        }
    }
}

/// Statistics over the parseable sensor values, one decimal. The cold-start
/// placeholder is not a measurement and is left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct HistoryStats {
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
}

impl HistoryStats {
    fn from_readings(readings: &[SensorReading]) -> Self {
        let measured = || readings.iter().filter(|r| !r.is_cold_start());
        let temps: Vec<f64> = measured().filter_map(SensorReading::temperature_celsius).collect();
        let hums: Vec<f64> = measured().filter_map(SensorReading::humidity_pct).collect();

        Self {
            min_temperature: temps.iter().copied().reduce(f64::min).map(round1),
            max_temperature: temps.iter().copied().reduce(f64::max).map(round1),
            avg_temperature: mean(&temps).map(round1),
            avg_humidity: mean(&hums).map(round1),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ActivitySummary {
    pub total_readings: usize,
    pub lamp_on_count: usize,
    pub humidifier_on_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryReport {
    pub terrarium_id: String,
    pub name: String,
    /// Newest first. The first page only unless every row was requested.
    pub rows: Vec<HistoryRow>,
    pub total_rows: usize,
    /// More rows exist beyond `rows`.
    pub has_more: bool,
    pub stats: HistoryStats,
    pub summary: ActivitySummary,
}

/// Merge the three series into one table. With `all = false` only the first
/// [`HISTORY_PAGE`] rows are returned.
pub fn history_report(terrarium: &Terrarium, all: bool) -> HistoryReport {
    let mut rows: Vec<HistoryRow> = terrarium
        .sensor_readings
        .iter()
        .map(HistoryRow::sensor)
        .chain(
            terrarium
                .lamp_events
                .iter()
                .map(|e| HistoryRow::device(Device::Lamp, e)),
        )
        .chain(
            terrarium
                .humidifier_events
                .iter()
                .map(|e| HistoryRow::device(Device::Humidifier, e)),
        )
        .collect();
    // Stable sort keeps series order for rows sharing a timestamp.
    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let total_rows = rows.len();
    if !all {
        rows.truncate(HISTORY_PAGE);
    }

    HistoryReport {
        terrarium_id: terrarium.id.clone(),
        name: terrarium.name.clone(),
        has_more: rows.len() < total_rows,
        rows,
        total_rows,
        stats: HistoryStats::from_readings(&terrarium.sensor_readings),
        summary: ActivitySummary {
            total_readings: terrarium.sensor_readings.len(),
            lamp_on_count: terrarium.lamp_events.iter().filter(|e| e.on).count(),
            humidifier_on_count: terrarium.humidifier_events.iter().filter(|e| e.on).count(),
        },
    }
}
