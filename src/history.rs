use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::store::{
    models::{Device, DeviceEvent, SensorReading, Terrarium},
    StoreError, TerrariumStore,
};

/// Maximum number of entries kept in each history list.
pub const HISTORY_CAP: usize = 50;

/// Insert `entry` at the head of a newest-first list and drop whatever falls
/// past [`HISTORY_CAP`].
pub fn prepend_bounded<T>(list: &mut Vec<T>, entry: T) {
    list.insert(0, entry);
    list.truncate(HISTORY_CAP);
}

/// Build the event recording a switch to `on` at `now`.
///
/// The timestamp matching the new state is refreshed; the other one is
/// carried over from `previous` (or stays null when there is no history).
pub fn next_device_event(previous: Option<&DeviceEvent>, on: bool, now: DateTime<Utc>) -> DeviceEvent {
    let last_turned_on = previous.and_then(|p| p.last_turned_on);
    let last_turned_off = previous.and_then(|p| p.last_turned_off);

    DeviceEvent {
        on,
        last_turned_on: if on { Some(now) } else { last_turned_on },
        last_turned_off: if on { last_turned_off } else { Some(now) },
        timestamp: now,
    }
}

// ---------------------------------------------------------------------------
// ConcurrencyMode
// ---------------------------------------------------------------------------

/// How [`DeviceLog`] treats a record that changed under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// Write unconditionally. Two appenders racing on one terrarium can both
    /// read the same base and the later write drops the other's entry.
    #[default]
    LastWriteWins,
    /// Re-read before writing and abort with [`StoreError::Conflict`] if the
    /// record's fingerprint moved. Narrows the race window; the store has no
    /// conditional write, so it cannot close it.
    Optimistic,
}

impl FromStr for ConcurrencyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(anyhow::anyhow!("unknown concurrency mode: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceLog
// ---------------------------------------------------------------------------

/// Appends readings and device events to a terrarium's bounded history.
///
/// Every append is a full read-modify-write of the record. Failures are
/// returned to the caller as-is; nothing is retried here.
#[derive(Debug, Clone)]
pub struct DeviceLog<S> {
    store: S,
    mode: ConcurrencyMode,
}

impl<S: TerrariumStore> DeviceLog<S> {
    pub fn new(store: S, mode: ConcurrencyMode) -> Self {
        Self { store, mode }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Prepend `reading`, re-stamped with the current time, to the sensor
    /// series. Returns the reading as stored.
    pub async fn append_sensor_reading(
        &self,
        terrarium_id: &str,
        reading: SensorReading,
    ) -> Result<SensorReading, StoreError> {
        let mut stored = None;
        self.read_modify_write(terrarium_id, |terrarium, now| {
            let reading = SensorReading {
                timestamp: now,
                ..reading
            };
            stored = Some(reading.clone());
            prepend_bounded(&mut terrarium.sensor_readings, reading);
        })
        .await?;

        info!(
            terrarium_id = %terrarium_id,
            temperature = stored.as_ref().map(|r| r.temperature.as_str()),
            humidity = stored.as_ref().map(|r| r.humidity.as_str()),
            "Sensor reading appended"
        );
        stored.ok_or_else(|| StoreError::NotFound(terrarium_id.to_owned()))
    }

    /// Prepend a switch event for `device`. Returns the new event.
    pub async fn append_device_event(
        &self,
        terrarium_id: &str,
        device: Device,
        on: bool,
    ) -> Result<DeviceEvent, StoreError> {
        let mut stored = None;
        self.read_modify_write(terrarium_id, |terrarium, now| {
            let event = next_device_event(terrarium.latest_event(device), on, now);
            stored = Some(event.clone());
            prepend_bounded(terrarium.device_events_mut(device), event);
        })
        .await?;

        info!(terrarium_id = %terrarium_id, device = %device, on, "Device event appended");
        stored.ok_or_else(|| StoreError::NotFound(terrarium_id.to_owned()))
    }

    pub async fn append_lamp_event(&self, terrarium_id: &str, on: bool) -> Result<DeviceEvent, StoreError> {
        self.append_device_event(terrarium_id, Device::Lamp, on).await
    }

    pub async fn append_humidifier_event(
        &self,
        terrarium_id: &str,
        on: bool,
    ) -> Result<DeviceEvent, StoreError> {
        self.append_device_event(terrarium_id, Device::Humidifier, on).await
    }

    async fn read_modify_write<F>(&self, terrarium_id: &str, apply: F) -> Result<Terrarium, StoreError>
    where
        F: FnOnce(&mut Terrarium, DateTime<Utc>) + Send,
    {
        let mut record = self.store.get(terrarium_id).await?;
        let base = match self.mode {
            ConcurrencyMode::Optimistic => Some(record.fingerprint()?),
            ConcurrencyMode::LastWriteWins => None,
        };

        apply(&mut record, Utc::now());

        if let Some(expected) = base {
            let current = self.store.get(terrarium_id).await?.fingerprint()?;
            if current != expected {
                warn!(terrarium_id = %terrarium_id, "Record changed since it was read; abandoning write");
                return Err(StoreError::Conflict(terrarium_id.to_owned()));
            }
        }

        self.store.replace(&record).await
    }
}
