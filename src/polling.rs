//! Per-view refresh loops.
//!
//! Each open view owns a [`ViewContext`] and a [`ScheduledTask`]. On every
//! tick the coordinator re-fetches the terrarium (or the whole collection for
//! the list view), derives the view's projection and hands it to a
//! [`Renderer`]. A failed fetch leaves the previous projection in place.

use std::{fmt, str::FromStr, time::Duration};

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    projection::{
        self, ControlPanel, HistoryReport, MonitorCharts, TerrariumSummary,
    },
    schedule::{self, ScheduledTask},
    standards::{AdvisoryTracker, Standards},
    store::{models::Terrarium, StoreError, TerrariumStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    List,
    Control,
    Monitor,
    History,
}

impl FromStr for ViewKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "control" => Ok(Self::Control),
            "monitor" => Ok(Self::Monitor),
            "history" => Ok(Self::History),
            other => bail!("unknown view {other:?}, expected list, control, monitor or history"),
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::List => "list",
            Self::Control => "control",
            Self::Monitor => "monitor",
            Self::History => "history",
        };
        f.write_str(s)
    }
}

/// What a view shows after a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", content = "data", rename_all = "snake_case")]
pub enum ViewProjection {
    List(Vec<TerrariumSummary>),
    Control(ControlPanel),
    Monitor(MonitorCharts),
    History(HistoryReport),
}

/// Output side of a view. Rendering is synchronous and must not block.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, kind: ViewKind, projection: &ViewProjection);
}

/// Logs each refreshed projection. Used by the binary's watch view.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRenderer;

impl Renderer for TracingRenderer {
    fn render(&self, kind: ViewKind, projection: &ViewProjection) {
        match projection {
            ViewProjection::List(cards) => {
                info!(view = %kind, terraria = cards.len(), "View refreshed");
            }
            ViewProjection::Control(panel) => {
                info!(
                    view = %kind,
                    terrarium_id = %panel.terrarium_id,
                    temperature = %panel.temperature,
                    humidity = %panel.humidity,
                    lamp_on = panel.lamp_on,
                    humidifier_on = panel.humidifier_on,
                    "View refreshed"
                );
                for advisory in &panel.announced {
                    warn!(terrarium_id = %panel.terrarium_id, kind = %advisory.kind, "{}", advisory.message);
                }
            }
            ViewProjection::Monitor(charts) => {
                info!(
                    view = %kind,
                    terrarium_id = %charts.terrarium_id,
                    readings = charts.readings.len(),
                    comfort = ?charts.gauge.as_ref().map(|g| g.level),
                    "View refreshed"
                );
            }
            ViewProjection::History(report) => {
                info!(
                    view = %kind,
                    terrarium_id = %report.terrarium_id,
                    rows = report.total_rows,
                    readings = report.summary.total_readings,
                    "View refreshed"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ViewContext
// ---------------------------------------------------------------------------

/// State of one open view. Owned by its refresh loop.
#[derive(Debug)]
pub struct ViewContext {
    kind: ViewKind,
    terrarium_id: Option<String>,
    projection: Option<ViewProjection>,
    advisories: AdvisoryTracker,
    refreshed_at: Option<DateTime<Utc>>,
    failed_ticks: u64,
}

impl ViewContext {
    /// The collection-wide list view.
    pub fn list() -> Self {
        Self::new(ViewKind::List, None)
    }

    /// A view of one terrarium. A `List` kind ignores the id.
    pub fn for_terrarium(kind: ViewKind, terrarium_id: impl Into<String>) -> Self {
        let id = match kind {
            ViewKind::List => None,
            _ => Some(terrarium_id.into()),
        };
        Self::new(kind, id)
    }

    fn new(kind: ViewKind, terrarium_id: Option<String>) -> Self {
        Self {
            kind,
            terrarium_id,
            projection: None,
            advisories: AdvisoryTracker::default(),
            refreshed_at: None,
            failed_ticks: 0,
        }
    }

    pub fn with_advisory_cooldown(mut self, cooldown: Duration) -> Self {
        self.advisories = AdvisoryTracker::new(cooldown);
        self
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn terrarium_id(&self) -> Option<&str> {
        self.terrarium_id.as_deref()
    }

    /// Last successfully derived projection.
    pub fn projection(&self) -> Option<&ViewProjection> {
        self.projection.as_ref()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }
}

// ---------------------------------------------------------------------------
// PollingCoordinator
// ---------------------------------------------------------------------------

/// Raw data fetched for one tick.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Collection(Vec<Terrarium>),
    Record(Terrarium),
}

#[derive(Debug, Clone)]
pub struct PollingCoordinator<S> {
    store: S,
    standards: Standards,
}

impl<S: TerrariumStore + Clone + 'static> PollingCoordinator<S> {
    pub fn new(store: S, standards: Standards) -> Self {
        Self { store, standards }
    }

    /// Read what `ctx` needs from the store. Does not touch the context.
    pub async fn fetch(&self, ctx: &ViewContext) -> Result<Snapshot, StoreError> {
        match (ctx.kind, ctx.terrarium_id.as_deref()) {
            (ViewKind::List, _) | (_, None) => Ok(Snapshot::Collection(self.store.list().await?)),
            (_, Some(id)) => Ok(Snapshot::Record(self.store.get(id).await?)),
        }
    }

    /// Derive the projection for `snapshot` and store it in `ctx`.
    pub fn apply<'a>(
        &self,
        ctx: &'a mut ViewContext,
        snapshot: Snapshot,
        now: DateTime<Utc>,
    ) -> &'a ViewProjection {
        let projection = match (ctx.kind, snapshot) {
            (_, Snapshot::Collection(all)) => {
                ViewProjection::List(all.iter().map(projection::summarize).collect())
            }
            (ViewKind::List, Snapshot::Record(one)) => {
                ViewProjection::List(vec![projection::summarize(&one)])
            }
            (ViewKind::Control, Snapshot::Record(one)) => {
                let mut panel = projection::control_panel(&one, &self.standards);
                panel.announced = ctx.advisories.observe(panel.advisories.clone(), now);
                ViewProjection::Control(panel)
            }
            (ViewKind::Monitor, Snapshot::Record(one)) => {
                ViewProjection::Monitor(projection::monitor_charts(&one, &self.standards))
            }
            (ViewKind::History, Snapshot::Record(one)) => {
                ViewProjection::History(projection::history_report(&one, false))
            }
        };
        ctx.refreshed_at = Some(now);
        ctx.projection.insert(projection)
    }

    /// Fetch and apply once. On failure the previous projection is kept.
    pub async fn refresh<'a>(&self, ctx: &'a mut ViewContext) -> Result<&'a ViewProjection, StoreError> {
        match self.fetch(ctx).await {
            Ok(snapshot) => Ok(self.apply(ctx, snapshot, Utc::now())),
            Err(e) => {
                ctx.failed_ticks += 1;
                Err(e)
            }
        }
    }

    /// Refresh `ctx` immediately and then every `period`, rendering each
    /// new projection. The loop owns the context; stopping the returned
    /// task discards it.
    pub fn spawn<R: Renderer>(self, mut ctx: ViewContext, period: Duration, renderer: R) -> ScheduledTask {
        ScheduledTask::spawn("view-refresh", move |liveness| async move {
            info!(
                view = %ctx.kind,
                terrarium_id = ?ctx.terrarium_id,
                interval_secs = period.as_secs(),
                "View refresh loop started"
            );
            let mut ticker = schedule::ticker(period);

            while liveness.is_alive() {
                ticker.tick().await;
                let fetched = self.fetch(&ctx).await;
                if !liveness.is_alive() {
                    debug!(view = %ctx.kind, "View closed while a refresh was in flight");
                    break;
                }

                match fetched {
                    Ok(snapshot) => {
                        let kind = ctx.kind;
                        let projection = self.apply(&mut ctx, snapshot, Utc::now());
                        renderer.render(kind, projection);
                    }
                    Err(e) => {
                        ctx.failed_ticks += 1;
                        warn!(
                            view = %ctx.kind,
                            terrarium_id = ?ctx.terrarium_id,
                            error = %e,
                            "View refresh failed; keeping previous projection"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    use tokio::time;

    use super::*;
    use crate::store::{
        models::{NewTerrarium, SensorReading, TerrariumPatch},
        MemoryStore,
    };

    /// Memory store whose reads can be made to fail or to stall.
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: Arc<AtomicBool>,
        delay: Duration,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                failing: Arc::new(AtomicBool::new(false)),
                delay: Duration::ZERO,
            }
        }

        async fn gate(&self) -> Result<(), StoreError> {
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Http {
                    status: 503,
                    body: "unavailable".to_owned(),
                });
            }
            Ok(())
        }
    }

    impl TerrariumStore for FlakyStore {
        async fn list(&self) -> Result<Vec<Terrarium>, StoreError> {
            self.gate().await?;
            self.inner.list().await
        }

        async fn get(&self, id: &str) -> Result<Terrarium, StoreError> {
            self.gate().await?;
            self.inner.get(id).await
        }

        async fn create(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
            self.inner.create(record).await
        }

        async fn replace(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
            self.inner.replace(record).await
        }

        async fn patch(&self, id: &str, patch: &TerrariumPatch) -> Result<Terrarium, StoreError> {
            self.inner.patch(id, patch).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
    }

    #[derive(Clone, Default)]
    struct RecordingRenderer {
        seen: Arc<Mutex<Vec<(ViewKind, ViewProjection)>>>,
    }

    impl RecordingRenderer {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last(&self) -> Option<(ViewKind, ViewProjection)> {
            self.seen.lock().unwrap().last().cloned()
        }
    }

    impl Renderer for RecordingRenderer {
        fn render(&self, kind: ViewKind, projection: &ViewProjection) {
            self.seen.lock().unwrap().push((kind, projection.clone()));
        }
    }

    /// A terrarium whose newest reading is too cold.
    async fn cold_terrarium(store: &MemoryStore) -> String {
        let mut record = NewTerrarium {
            name: "Gecko tank".to_owned(),
            active: true,
            avatar: None,
            color: None,
            species: None,
        }
        .into_record(Utc::now());
        record
            .sensor_readings
            .push(SensorReading::new(24.0, 60.0, Utc::now()));
        store.create(&record).await.unwrap().id
    }

    #[test]
    fn view_kind_parses() {
        assert_eq!("Monitor".parse::<ViewKind>().unwrap(), ViewKind::Monitor);
        assert_eq!(ViewKind::History.to_string(), "history");
        assert!("dashboard".parse::<ViewKind>().is_err());
    }

    #[test]
    fn list_context_has_no_terrarium() {
        assert_eq!(ViewContext::for_terrarium(ViewKind::List, "7").terrarium_id(), None);
        assert_eq!(
            ViewContext::for_terrarium(ViewKind::Control, "7").terrarium_id(),
            Some("7")
        );
    }

    #[tokio::test]
    async fn refresh_derives_projection_per_view() {
        let store = MemoryStore::new();
        let id = cold_terrarium(&store).await;
        let coordinator = PollingCoordinator::new(store, Standards::default());

        let mut list = ViewContext::list();
        match coordinator.refresh(&mut list).await.unwrap() {
            ViewProjection::List(cards) => assert_eq!(cards.len(), 1),
            other => panic!("unexpected projection {other:?}"),
        }

        let mut history = ViewContext::for_terrarium(ViewKind::History, &id);
        match coordinator.refresh(&mut history).await.unwrap() {
            ViewProjection::History(report) => assert_eq!(report.summary.total_readings, 1),
            other => panic!("unexpected projection {other:?}"),
        }
        assert!(history.refreshed_at().is_some());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_projection() {
        let memory = MemoryStore::new();
        let id = cold_terrarium(&memory).await;
        let store = FlakyStore::new(memory);
        let coordinator = PollingCoordinator::new(store.clone(), Standards::default());
        let mut ctx = ViewContext::for_terrarium(ViewKind::Monitor, &id);

        let before = coordinator.refresh(&mut ctx).await.unwrap().clone();
        let stamp = ctx.refreshed_at();

        store.failing.store(true, Ordering::SeqCst);
        assert!(coordinator.refresh(&mut ctx).await.is_err());
        assert_eq!(ctx.projection(), Some(&before));
        assert_eq!(ctx.refreshed_at(), stamp);
        assert_eq!(ctx.failed_ticks(), 1);
    }

    #[tokio::test]
    async fn control_view_announces_each_advisory_once() {
        let store = MemoryStore::new();
        let id = cold_terrarium(&store).await;
        let coordinator = PollingCoordinator::new(store, Standards::default());
        let mut ctx = ViewContext::for_terrarium(ViewKind::Control, &id);

        let announced = |p: &ViewProjection| match p {
            ViewProjection::Control(panel) => (panel.advisories.len(), panel.announced.len()),
            other => panic!("unexpected projection {other:?}"),
        };
        assert_eq!(announced(coordinator.refresh(&mut ctx).await.unwrap()), (1, 1));
        assert_eq!(announced(coordinator.refresh(&mut ctx).await.unwrap()), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn view_renders_on_its_cadence() {
        let store = MemoryStore::new();
        let id = cold_terrarium(&store).await;
        let renderer = RecordingRenderer::default();

        let task = PollingCoordinator::new(store, Standards::default()).spawn(
            ViewContext::for_terrarium(ViewKind::Control, &id),
            Duration::from_secs(2),
            renderer.clone(),
        );
        time::sleep(Duration::from_secs(5)).await;
        // t = 0, 2, 4
        assert_eq!(renderer.count(), 3);
        assert!(task.is_running());
        assert!(matches!(renderer.last(), Some((ViewKind::Control, ViewProjection::Control(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_view_never_renders_again() {
        let store = MemoryStore::new();
        cold_terrarium(&store).await;
        let renderer = RecordingRenderer::default();

        let task = PollingCoordinator::new(store, Standards::default()).spawn(
            ViewContext::list(),
            Duration::from_secs(30),
            renderer.clone(),
        );
        time::sleep(Duration::from_secs(45)).await;
        assert_eq!(renderer.count(), 2);

        task.stop();
        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(renderer.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_are_skipped_and_loop_recovers() {
        let memory = MemoryStore::new();
        let id = cold_terrarium(&memory).await;
        let store = FlakyStore::new(memory);
        store.failing.store(true, Ordering::SeqCst);
        let renderer = RecordingRenderer::default();

        let task = PollingCoordinator::new(store.clone(), Standards::default()).spawn(
            ViewContext::for_terrarium(ViewKind::History, &id),
            Duration::from_secs(2),
            renderer.clone(),
        );
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(renderer.count(), 0);
        assert!(task.is_running());

        store.failing.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(renderer.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_refresh_is_dropped_after_stop() {
        let memory = MemoryStore::new();
        let id = cold_terrarium(&memory).await;
        let mut store = FlakyStore::new(memory);
        store.delay = Duration::from_secs(5);
        let renderer = RecordingRenderer::default();

        let task = PollingCoordinator::new(store, Standards::default()).spawn(
            ViewContext::for_terrarium(ViewKind::Monitor, &id),
            Duration::from_secs(2),
            renderer.clone(),
        );
        time::sleep(Duration::from_secs(1)).await;
        task.stop();

        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(renderer.count(), 0);
    }
}
