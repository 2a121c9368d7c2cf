use std::time::Duration;

use tracing::{error, info, warn};

use crate::{
    history::DeviceLog,
    schedule::{self, ScheduledTask},
    sensors::simulator::SensorSimulator,
    store::{
        models::{Device, SensorReading},
        StoreError, TerrariumStore,
    },
};

/// Outcome of one pass over the whole collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub simulated: usize,
    pub skipped_inactive: usize,
    pub failed: usize,
}

/// Advances terraria's sensor series with simulated readings.
#[derive(Debug, Clone)]
pub struct SensorService<S> {
    log: DeviceLog<S>,
    simulator: SensorSimulator,
}

impl<S: TerrariumStore + Clone + 'static> SensorService<S> {
    pub fn new(log: DeviceLog<S>, simulator: SensorSimulator) -> Self {
        Self { log, simulator }
    }

    /// Fetches the terrarium, derives the next reading from the heads of its
    /// three series and appends it.
    pub async fn simulate_terrarium(&self, terrarium_id: &str) -> Result<SensorReading, StoreError> {
        let terrarium = self.log.store().get(terrarium_id).await?;
        let reading = self.simulator.next_reading(
            terrarium.latest_sensor(),
            terrarium.device_on(Device::Lamp),
            terrarium.device_on(Device::Humidifier),
        );
        self.log.append_sensor_reading(terrarium_id, reading).await
    }

    /// One pass of the global simulation: every active terrarium gets a new
    /// reading. A failure on one terrarium is logged and the sweep moves on.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let terraria = self.log.store().list().await?;
        let mut report = SweepReport::default();

        for terrarium in terraria {
            if !terrarium.active {
                report.skipped_inactive += 1;
                continue;
            }
            match self.simulate_terrarium(&terrarium.id).await {
                Ok(_) => report.simulated += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(terrarium_id = %terrarium.id, error = %e, "Failed to simulate terrarium");
                }
            }
        }

        Ok(report)
    }

    /// Runs [`sweep`](Self::sweep) immediately and then every `period`,
    /// independent of any open view.
    pub fn spawn_global(self, period: Duration) -> ScheduledTask {
        ScheduledTask::spawn("global-simulation", move |liveness| async move {
            info!(interval_secs = period.as_secs(), "Global simulation started");
            let mut ticker = schedule::ticker(period);

            while liveness.is_alive() {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) => info!(
                        simulated = report.simulated,
                        skipped_inactive = report.skipped_inactive,
                        failed = report.failed,
                        "Global simulation sweep completed"
                    ),
                    Err(e) => error!(error = %e, "Global simulation sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;
    use crate::{
        history::ConcurrencyMode,
        store::{models::NewTerrarium, MemoryStore},
    };

    fn service(store: &MemoryStore) -> SensorService<MemoryStore> {
        SensorService::new(
            DeviceLog::new(store.clone(), ConcurrencyMode::LastWriteWins),
            SensorSimulator::seeded(21, FixedOffset::east_opt(0).unwrap()),
        )
    }

    async fn create(store: &MemoryStore, name: &str, active: bool) -> String {
        store
            .create(
                &NewTerrarium {
                    name: name.to_owned(),
                    active,
                    avatar: None,
                    color: None,
                    species: None,
                }
                .into_record(Utc::now()),
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn first_tick_on_fresh_terrarium_is_cold_start() {
        let store = MemoryStore::new();
        let id = create(&store, "fresh", true).await;

        let reading = service(&store).simulate_terrarium(&id).await.unwrap();
        assert!(reading.is_cold_start());

        let got = store.get(&id).await.unwrap();
        assert_eq!(got.sensor_readings.len(), 1);
        assert_eq!(got.sensor_readings[0].humidity, "0.0");
    }

    #[tokio::test]
    async fn real_base_advances_with_lamp_effect() {
        let store = MemoryStore::new();
        let id = create(&store, "lit", true).await;
        let log = DeviceLog::new(store.clone(), ConcurrencyMode::LastWriteWins);
        log.append_sensor_reading(&id, SensorReading::new(24.0, 60.0, Utc::now()))
            .await
            .unwrap();
        log.append_lamp_event(&id, true).await.unwrap();

        let reading = service(&store).simulate_terrarium(&id).await.unwrap();
        let t = reading.temperature_celsius().unwrap();
        assert!(!reading.is_cold_start());
        // walk ±1.5, circadian -2.5..+2.0, season -1.5..+2.0, jitter ±0.8, lamp +2..+4
        assert!((20.0..=34.3).contains(&t), "t={t}");
    }

    #[tokio::test]
    async fn sweep_only_touches_active_terraria() {
        let store = MemoryStore::new();
        let active = create(&store, "on", true).await;
        let inactive = create(&store, "off", false).await;

        let report = service(&store).sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                simulated: 1,
                skipped_inactive: 1,
                failed: 0
            }
        );
        assert_eq!(store.get(&active).await.unwrap().sensor_readings.len(), 1);
        assert!(store.get(&inactive).await.unwrap().sensor_readings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn global_simulation_runs_on_its_own_cadence() {
        let store = MemoryStore::new();
        let id = create(&store, "tank", true).await;

        let task = service(&store).spawn_global(Duration::from_secs(1_800));
        tokio::time::sleep(Duration::from_secs(3_700)).await;
        // t = 0, 1800, 3600
        assert_eq!(store.get(&id).await.unwrap().sensor_readings.len(), 3);

        task.stop();
        tokio::time::sleep(Duration::from_secs(7_200)).await;
        assert_eq!(store.get(&id).await.unwrap().sensor_readings.len(), 3);
    }
}
