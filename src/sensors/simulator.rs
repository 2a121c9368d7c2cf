//! Synthetic ambient sensor model.
//!
//! There is no sensor hardware behind a terrarium; every reading is produced
//! here from the previous one. The model layers, in order:
//!
//! | Step | Temperature                           | Humidity              |
//! |------|---------------------------------------|-----------------------|
//! | base | time-of-day band, or previous ± 1.5   | band, or previous ± 3 |
//! | +    | circadian offset (−2.5 … +2.0)        |                       |
//! | +    | seasonal offset (−1.5 … +2.0)         |                       |
//! | +    | jitter ± 0.8                          | jitter ± 2            |
//! | clamp| 18.0 – 35.0                           | 40.0 – 85.0           |
//! | +    | lamp on: 2.0 – 4.0                    | humidifier: 10 – 20   |
//! | clamp| 18.0 – 40.0                           | 30.0 – 95.0           |
//!
//! All values are rounded to one decimal after each clamp.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::warn;

use crate::store::models::SensorReading;

/// Clamp range of the steady-state model.
pub const STEADY_TEMPERATURE: (f64, f64) = (18.0, 35.0);
pub const STEADY_HUMIDITY: (f64, f64) = (40.0, 85.0);

/// Wider clamp range once device effects are applied.
pub const OPERATIONAL_TEMPERATURE: (f64, f64) = (18.0, 40.0);
pub const OPERATIONAL_HUMIDITY: (f64, f64) = (30.0, 95.0);

/// Reading substituted when the model fails.
pub const FALLBACK_TEMPERATURE: f64 = 25.0;
pub const FALLBACK_HUMIDITY: f64 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("simulated {0} is not a finite number")]
    NonFinite(&'static str),
}

// ---------------------------------------------------------------------------
// Time of day / season
// ---------------------------------------------------------------------------

/// Coarse time-of-day band selecting the base values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPeriod {
    /// 22:00 – 06:00
    Night,
    /// 06:00 – 12:00
    Morning,
    /// 12:00 – 18:00
    Afternoon,
    /// 18:00 – 22:00
    Evening,
}

impl DayPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            18..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// `(°C, %)` baseline for this band.
    pub fn base(self) -> (f64, f64) {
        match self {
            Self::Night => (22.0, 65.0),
            Self::Morning => (25.0, 60.0),
            Self::Afternoon => (28.0, 55.0),
            Self::Evening => (24.0, 62.0),
        }
    }
}

/// Temperature offset following the enclosure's daily heating cycle.
pub fn circadian_offset(hour: u32) -> f64 {
    match hour {
        6..=9 => -1.0,
        10..=14 => 2.0,
        15..=17 => 1.5,
        18..=21 => 0.0,
        _ => -2.5,
    }
}

/// Temperature offset by calendar month (northern hemisphere).
pub fn seasonal_offset(month: u32) -> f64 {
    match month {
        3 | 4 => 0.5,
        5..=7 => 2.0,
        8..=11 => 1.0,
        _ => -1.5,
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Steady-state reading: smooth random walk from `previous`, or the
/// time-of-day band when there is no usable previous value.
pub fn generate_realistic<R: Rng + ?Sized>(
    rng: &mut R,
    previous: Option<&SensorReading>,
    now: DateTime<FixedOffset>,
) -> Result<SensorReading, SimulationError> {
    let hour = now.hour();
    let (band_temp, band_hum) = DayPeriod::from_hour(hour).base();

    let previous = previous.and_then(|p| Some((p.temperature_celsius()?, p.humidity_pct()?)));
    let (mut temperature, mut humidity) = match previous {
        Some((t, h)) => (t + rng.gen_range(-1.5..=1.5), h + rng.gen_range(-3.0..=3.0)),
        None => (band_temp, band_hum),
    };

    temperature += circadian_offset(hour);
    temperature += seasonal_offset(now.month());
    temperature += rng.gen_range(-0.8..=0.8);
    humidity += rng.gen_range(-2.0..=2.0);

    finish(temperature, humidity, STEADY_TEMPERATURE, STEADY_HUMIDITY, now.with_timezone(&Utc))
}

/// Add the lamp and humidifier effects to an already generated reading.
pub fn apply_device_effects<R: Rng + ?Sized>(
    rng: &mut R,
    base: &SensorReading,
    lamp_on: bool,
    humidifier_on: bool,
) -> Result<SensorReading, SimulationError> {
    let mut temperature = base
        .temperature_celsius()
        .ok_or(SimulationError::NonFinite("temperature"))?;
    let mut humidity = base
        .humidity_pct()
        .ok_or(SimulationError::NonFinite("humidity"))?;

    if lamp_on {
        temperature += rng.gen_range(2.0..=4.0);
    }
    if humidifier_on {
        humidity += rng.gen_range(10.0..=20.0);
    }

    finish(
        temperature,
        humidity,
        OPERATIONAL_TEMPERATURE,
        OPERATIONAL_HUMIDITY,
        base.timestamp,
    )
}

/// Steady-state reading with device effects layered on top.
pub fn generate_with_effects<R: Rng + ?Sized>(
    rng: &mut R,
    previous: Option<&SensorReading>,
    now: DateTime<FixedOffset>,
    lamp_on: bool,
    humidifier_on: bool,
) -> Result<SensorReading, SimulationError> {
    let base = generate_realistic(rng, previous, now)?;
    apply_device_effects(rng, &base, lamp_on, humidifier_on)
}

/// Next reading for a terrarium. Never fails.
///
/// Without a previous reading, or while the previous one is still the
/// cold-start sentinel, the sentinel is emitted again. Otherwise the full
/// model runs; if it fails the fixed fallback reading is returned.
pub fn safe_generate<R: Rng + ?Sized>(
    rng: &mut R,
    previous: Option<&SensorReading>,
    now: DateTime<FixedOffset>,
    lamp_on: bool,
    humidifier_on: bool,
) -> SensorReading {
    let stamp = now.with_timezone(&Utc);
    match previous {
        Some(p) if !p.is_cold_start() => {
            or_fallback(generate_with_effects(rng, previous, now, lamp_on, humidifier_on), stamp)
        }
        _ => SensorReading::cold_start(stamp),
    }
}

fn or_fallback(result: Result<SensorReading, SimulationError>, now: DateTime<Utc>) -> SensorReading {
    result.unwrap_or_else(|e| {
        warn!(error = %e, "Sensor simulation failed; using fallback reading");
        SensorReading::new(FALLBACK_TEMPERATURE, FALLBACK_HUMIDITY, now)
    })
}

fn finish(
    temperature: f64,
    humidity: f64,
    temperature_range: (f64, f64),
    humidity_range: (f64, f64),
    timestamp: DateTime<Utc>,
) -> Result<SensorReading, SimulationError> {
    if !temperature.is_finite() {
        return Err(SimulationError::NonFinite("temperature"));
    }
    if !humidity.is_finite() {
        return Err(SimulationError::NonFinite("humidity"));
    }
    let temperature = round1(temperature.clamp(temperature_range.0, temperature_range.1));
    let humidity = round1(humidity.clamp(humidity_range.0, humidity_range.1));
    Ok(SensorReading::new(temperature, humidity, timestamp))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// SensorSimulator
// ---------------------------------------------------------------------------

/// Shared handle to the model: owns the RNG and the site's UTC offset used
/// for the time-of-day and season lookups.
///
/// Cheap to clone; clones draw from the same RNG.
#[derive(Debug, Clone)]
pub struct SensorSimulator {
    rng: Arc<Mutex<StdRng>>,
    offset: FixedOffset,
}

impl SensorSimulator {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            offset,
        }
    }

    /// Deterministic simulator for tests and replays.
    pub fn seeded(seed: u64, offset: FixedOffset) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            offset,
        }
    }

    pub fn next_reading(
        &self,
        previous: Option<&SensorReading>,
        lamp_on: bool,
        humidifier_on: bool,
    ) -> SensorReading {
        self.next_reading_at(previous, lamp_on, humidifier_on, Utc::now())
    }

    pub fn next_reading_at(
        &self,
        previous: Option<&SensorReading>,
        lamp_on: bool,
        humidifier_on: bool,
        now: DateTime<Utc>,
    ) -> SensorReading {
        let local = now.with_timezone(&self.offset);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        safe_generate(&mut *rng, previous, local, lamp_on, humidifier_on)
    }
}
