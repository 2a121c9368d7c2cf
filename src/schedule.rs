use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{self, Interval, MissedTickBehavior},
};
use tracing::info;

/// Liveness flag handed to a scheduled loop.
///
/// Checked after every suspension point so a completion that resolves after
/// teardown is dropped instead of touching view state.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to a recurring background task.
///
/// Stopping (or dropping) the handle flips the liveness flag and aborts the
/// task, which also drops its timer.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn `body` on the runtime. The closure receives the liveness flag
    /// for the loop it builds.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(Liveness) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(body(Liveness(Arc::clone(&alive))));
        info!(task = name, "Scheduled task started");
        Self { name, alive, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `true` until the task is stopped or its loop exits on its own.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.handle.is_finished()
    }

    /// Stop the task. Nothing it has in flight will be applied afterwards.
    pub fn stop(self) {
        // Teardown happens in Drop.
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.handle.abort();
            info!(task = self.name, "Scheduled task stopped");
        }
    }
}

/// Interval that fires immediately, then every `period`. Ticks missed while
/// a slow refresh was in flight are skipped rather than bunched up.
pub fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
