//! Husbandry standards and the advisories raised when a reading leaves them.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::store::models::SensorReading;

pub const TEMP_MIN: f64 = 26.0;
pub const TEMP_MAX: f64 = 32.0;
pub const HUM_MIN: f64 = 50.0;
pub const HUM_MAX: f64 = 70.0;
pub const HUM_TARGET: f64 = 60.0;

/// Which bound a reading crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    TemperatureLow,
    TemperatureHigh,
    HumidityLow,
    HumidityHigh,
}

impl AdvisoryKind {
    /// Device action that would bring the value back into range.
    pub fn recommendation(self) -> &'static str {
        match self {
            Self::TemperatureLow => "consider turning the UV lamp on",
            Self::TemperatureHigh => "consider turning the UV lamp off",
            Self::HumidityLow => "consider turning the humidifier on",
            Self::HumidityHigh => "consider turning the humidifier off",
        }
    }
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TemperatureLow => "temperature low",
            Self::TemperatureHigh => "temperature high",
            Self::HumidityLow => "humidity low",
            Self::HumidityHigh => "humidity high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    /// The offending value (°C or %).
    pub value: f64,
    pub message: String,
}

impl Advisory {
    fn new(kind: AdvisoryKind, value: f64) -> Self {
        let unit = match kind {
            AdvisoryKind::TemperatureLow | AdvisoryKind::TemperatureHigh => " °C",
            AdvisoryKind::HumidityLow | AdvisoryKind::HumidityHigh => "%",
        };
        let message = format!("{kind} ({value:.1}{unit}): {}.", kind.recommendation());
        Self { kind, value, message }
    }
}

// ---------------------------------------------------------------------------
// Standards
// ---------------------------------------------------------------------------

/// Acceptable ranges for a terrarium.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standards {
    pub temp_min: f64,
    pub temp_max: f64,
    pub hum_min: f64,
    pub hum_max: f64,
}

impl Default for Standards {
    fn default() -> Self {
        Self {
            temp_min: TEMP_MIN,
            temp_max: TEMP_MAX,
            hum_min: HUM_MIN,
            hum_max: HUM_MAX,
        }
    }
}

impl Standards {
    /// Midpoint of the temperature range, used by the comfort gauge.
    pub fn ideal_temperature(&self) -> f64 {
        self.temp_min + (self.temp_max - self.temp_min) / 2.0
    }

    /// Each metric is checked independently; at most one advisory per metric.
    pub fn evaluate(&self, temperature: f64, humidity: f64) -> Vec<Advisory> {
        self.check_temperature(temperature)
            .into_iter()
            .chain(self.check_humidity(humidity))
            .collect()
    }

    /// Like [`evaluate`](Self::evaluate) but for a stored reading. The
    /// cold-start sentinel is not a measurement and raises nothing; an
    /// unparseable metric is skipped.
    pub fn evaluate_reading(&self, reading: &SensorReading) -> Vec<Advisory> {
        if reading.is_cold_start() {
            return Vec::new();
        }
        reading
            .temperature_celsius()
            .and_then(|t| self.check_temperature(t))
            .into_iter()
            .chain(reading.humidity_pct().and_then(|h| self.check_humidity(h)))
            .collect()
    }

    fn check_temperature(&self, value: f64) -> Option<Advisory> {
        if value < self.temp_min {
            Some(Advisory::new(AdvisoryKind::TemperatureLow, value))
        } else if value > self.temp_max {
            Some(Advisory::new(AdvisoryKind::TemperatureHigh, value))
        } else {
            None
        }
    }

    fn check_humidity(&self, value: f64) -> Option<Advisory> {
        if value < self.hum_min {
            Some(Advisory::new(AdvisoryKind::HumidityLow, value))
        } else if value > self.hum_max {
            Some(Advisory::new(AdvisoryKind::HumidityHigh, value))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// AdvisoryTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Announcement {
    /// Condition was present on the most recent evaluation.
    active: bool,
    at: DateTime<Utc>,
}

/// Suppresses advisories that are already showing.
///
/// An advisory is announced once when its condition appears. It stays quiet
/// while the condition persists. After the condition clears it can be
/// announced again, but not sooner than `cooldown` after the previous
/// announcement.
#[derive(Debug)]
pub struct AdvisoryTracker {
    cooldown: TimeDelta,
    seen: HashMap<AdvisoryKind, Announcement>,
}

impl AdvisoryTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            seen: HashMap::new(),
        }
    }

    /// Feed the advisories of one evaluation; returns those to announce now.
    pub fn observe(&mut self, advisories: Vec<Advisory>, now: DateTime<Utc>) -> Vec<Advisory> {
        let present: HashSet<AdvisoryKind> = advisories.iter().map(|a| a.kind).collect();
        for (kind, state) in self.seen.iter_mut() {
            if !present.contains(kind) {
                state.active = false;
            }
        }

        advisories
            .into_iter()
            .filter(|advisory| match self.seen.get_mut(&advisory.kind) {
                Some(state) if state.active => false,
                Some(state) if now - state.at < self.cooldown => {
                    state.active = true;
                    false
                }
                _ => {
                    self.seen.insert(advisory.kind, Announcement { active: true, at: now });
                    true
                }
            })
            .collect()
    }

    /// Kinds whose condition was present on the last evaluation.
    pub fn active(&self) -> Vec<AdvisoryKind> {
        self.seen
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(k, _)| *k)
            .collect()
    }
}

impl Default for AdvisoryTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
