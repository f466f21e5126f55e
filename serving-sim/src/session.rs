use crate::analytics::{standard_monitors, AnalyticsHub, MetricSeries, Monitor};
use crate::interaction_log::{InteractionLog, LogEvent};
use crate::metadata::{MetadataStore, SessionMetadata};
use crate::registry::{CandidateModel, ModelRegistry, ModelSummary};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::training::{self, Sampling};
use crate::types::{
    validate_rate, InteractionRecord, PredictionModel, Result, SchedulerSettings,
    SimulationConfig,
};
use chrono::Utc;
use interfaces::{BlobStore, ConstantModel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// One running simulation: log, registry, scheduler and analytics sharing one store.
pub struct Simulation {
    config: SimulationConfig,
    metadata: Arc<MetadataStore>,
    log: Arc<InteractionLog>,
    registry: Arc<ModelRegistry>,
    scheduler: Scheduler,
    analytics: AnalyticsHub,
    monitors: Vec<Arc<dyn Monitor>>,
}

impl Simulation {
    /// Restore persisted state and spawn the worker tasks. The scheduler
    /// starts stopped with the persisted rate and mode.
    pub async fn open(config: SimulationConfig, store: Arc<dyn BlobStore>) -> Result<Self> {
        let defaults = SessionMetadata {
            target_rate_per_second: validate_rate(config.default_rate_per_second)?,
            ..SessionMetadata::default()
        };
        let metadata = Arc::new(MetadataStore::load_with_defaults(store.clone(), defaults).await);
        let log = Arc::new(InteractionLog::load(store.clone(), metadata.clone()).await);

        let fallback: Arc<dyn PredictionModel> =
            Arc::new(ConstantModel::new(config.constant_outcome.clone()));
        let registry = Arc::new(ModelRegistry::load(store, fallback).await);

        let persisted = metadata.get().await;
        let settings = SchedulerSettings {
            operating: false,
            accelerated_mode: persisted.accelerated_mode,
            target_rate_per_second: persisted.target_rate_per_second,
        };
        let scheduler = Scheduler::spawn(&config, registry.holder(), log.clone(), settings)?;

        let monitors = standard_monitors(&config.monitors);
        let analytics = AnalyticsHub::spawn(
            log.clone(),
            monitors.clone(),
            Duration::from_millis(config.analytics_cadence_ms),
        );

        info!(
            "Simulation ready: {} records, model {}",
            log.len().await,
            registry.holder().get_active().model_name()
        );

        Ok(Self {
            config,
            metadata,
            log,
            registry,
            scheduler,
            analytics,
            monitors,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn log(&self) -> Arc<InteractionLog> {
        self.log.clone()
    }

    pub fn registry(&self) -> Arc<ModelRegistry> {
        self.registry.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn records(&self) -> Vec<InteractionRecord> {
        self.log.snapshot().await
    }

    pub async fn recent(&self, count: usize) -> Vec<InteractionRecord> {
        self.log.recent(count).await
    }

    pub async fn query(&self, start: u64, end: u64) -> Vec<InteractionRecord> {
        self.log.query(start, end).await
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    /// Wipe the log and session metadata. Committed models are kept.
    pub async fn clear_all(&self) -> Result<()> {
        self.log.clear().await?;
        let defaults = self.metadata.reset().await?;
        self.scheduler.configure(SchedulerSettings {
            operating: self.scheduler.is_operating(),
            accelerated_mode: defaults.accelerated_mode,
            target_rate_per_second: defaults.target_rate_per_second,
        })?;
        info!("Cleared interaction log and session settings");
        Ok(())
    }

    pub async fn metadata(&self) -> SessionMetadata {
        self.metadata.get().await
    }

    /// Serve an already committed version from now on.
    pub async fn load_model(&self, version: u32) -> Result<()> {
        self.registry.activate(version).await
    }

    /// Train a candidate on the validated records in `start..=end`.
    pub async fn train_range(
        &self,
        start: u64,
        end: u64,
        sampling: Sampling,
    ) -> Result<CandidateModel> {
        let records = training::extract(&self.log, start, end).await?;
        let examples = training::prepare(&records, sampling);
        Ok(self.registry.train(&examples).await)
    }

    pub async fn commit(&self, candidate: CandidateModel) -> Result<u32> {
        self.registry.commit(candidate).await
    }

    pub async fn delete_model(&self, version: u32) -> Result<bool> {
        self.registry.delete(version).await
    }

    pub async fn list_models(&self) -> Vec<ModelSummary> {
        self.registry.list().await
    }

    pub fn active_model(&self) -> Arc<dyn PredictionModel> {
        self.registry.holder().get_active()
    }

    pub async fn set_target_rate(&self, rate: f64) -> Result<()> {
        let rate = validate_rate(rate)?;
        self.metadata
            .update(|m| m.target_rate_per_second = rate)
            .await?;
        self.scheduler.set_target_rate(rate)
    }

    pub async fn set_accelerated(&self, accelerated: bool) -> Result<()> {
        self.metadata
            .update(|m| m.accelerated_mode = accelerated)
            .await?;
        self.scheduler.set_accelerated(accelerated)
    }

    pub fn start(&self) -> Result<()> {
        self.scheduler.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.scheduler.stop()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Last series published by the named monitor.
    pub fn latest_metrics(&self, name: &str) -> Option<MetricSeries> {
        self.analytics.latest(name)
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.analytics.monitor_names()
    }

    /// Compute every monitor against the current log right now.
    pub async fn compute_metrics(&self) -> Vec<MetricSeries> {
        let records = self.log.snapshot().await;
        let now = Utc::now();
        self.monitors
            .iter()
            .map(|monitor| monitor.compute(&records, now))
            .collect()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.analytics.shutdown().await;
        info!("Simulation shut down");
    }
}
