use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::Gatekeeper;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Owns the engine's background tasks. Tasks stop on [`shutdown`] or drop.
///
/// [`shutdown`]: MaintenanceHandle::shutdown
pub struct MaintenanceHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl MaintenanceHandle {
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    pub fn shutdown(mut self) {
        for (name, task) in self.tasks.drain(..) {
            task.abort();
            tracing::debug!(task = name, "maintenance task stopped");
        }
        tracing::info!("gatekeeper maintenance stopped");
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
    }
}

pub(crate) fn spawn(engine: Arc<Gatekeeper>) -> MaintenanceHandle {
    let schedule = engine.config().maintenance.clone();
    let mut tasks = Vec::with_capacity(4);

    tasks.push((
        "alert_purge",
        every(schedule.alert_purge_every, engine.clone(), |engine| async move {
            let purged = engine.alerts().purge().await;
            if purged > 0 {
                tracing::info!(purged = purged, "purged resolved alerts");
            }
        }),
    ));
    tasks.push((
        "latency_check",
        every(schedule.latency_check_every, engine.clone(), |engine| async move {
            engine.metrics().check_latency().await;
        }),
    ));
    tasks.push((
        "memory_check",
        every(schedule.memory_check_every, engine.clone(), |engine| async move {
            engine.metrics().check_memory().await;
        }),
    ));
    tasks.push((
        "state_sweep",
        every(schedule.quota_sweep_every, engine, |engine| async move {
            let quotas = engine.admission().prune_idle().await;
            let records = engine.store().sweep();
            if quotas + records > 0 {
                tracing::debug!(
                    quota_records = quotas,
                    mitigation_records = records,
                    "swept idle state"
                );
            }
        }),
    ));

    tracing::info!(tasks = tasks.len(), "gatekeeper maintenance started");
    MaintenanceHandle { tasks }
}

fn every<F, Fut>(period: Duration, engine: Arc<Gatekeeper>, job: F) -> JoinHandle<()>
where
    F: Fn(Arc<Gatekeeper>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; run jobs one period in.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            job(engine.clone()).await;
        }
    })
}
