use super::{MetricSeries, Monitor};
use crate::interaction_log::{InteractionLog, LogEvent};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Runs each monitor on its own task and republishes its latest series.
pub struct AnalyticsHub {
    series: HashMap<String, watch::Receiver<MetricSeries>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalyticsHub {
    /// Start one task per monitor. Each recomputes every `cadence` and
    /// whenever the log changes.
    pub fn spawn(
        log: Arc<InteractionLog>,
        monitors: Vec<Arc<dyn Monitor>>,
        cadence: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut series = HashMap::new();
        let mut tasks = Vec::new();

        for monitor in monitors {
            let name = monitor.monitor_name();
            let (tx, rx) = watch::channel(MetricSeries::empty(name.clone()));
            tasks.push(tokio::spawn(run_monitor(
                monitor,
                log.clone(),
                log.subscribe(),
                tx,
                shutdown.subscribe(),
                cadence,
            )));
            series.insert(name, rx);
        }

        info!("Analytics hub running {} monitors", series.len());
        Self {
            series,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn monitor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn latest(&self, name: &str) -> Option<MetricSeries> {
        self.series.get(name).map(|rx| rx.borrow().clone())
    }

    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<MetricSeries>> {
        self.series.get(name).cloned()
    }

    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!("Monitor task ended abnormally: {}", e);
            }
        }
        debug!("Analytics hub stopped");
    }
}

impl Drop for AnalyticsHub {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_monitor(
    monitor: Arc<dyn Monitor>,
    log: Arc<InteractionLog>,
    mut events: broadcast::Receiver<LogEvent>,
    publish: watch::Sender<MetricSeries>,
    mut shutdown: watch::Receiver<bool>,
    cadence: Duration,
) {
    let name = monitor.monitor_name();
    let mut interval = tokio::time::interval(cadence.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let records = log.snapshot().await;
        publish.send_replace(monitor.compute(&records, Utc::now()));

        tokio::select! {
            _ = interval.tick() => {}
            event = events.recv() => match event {
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Monitor {} lagged by {} log events", name, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Monitor {} stopped", name);
}
