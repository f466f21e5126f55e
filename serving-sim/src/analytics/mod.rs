pub mod accuracy;
pub mod batching;
pub mod hub;
pub mod latency;
pub mod throughput;

pub use accuracy::AccuracyMonitor;
pub use batching::{Batch, BatchPlan, Partition};
pub use hub::AnalyticsHub;
pub use latency::LatencyMonitor;
pub use throughput::ThroughputMonitor;

use crate::types::{InteractionRecord, MonitorConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    pub monitor: String,
    pub computed_at: Option<DateTime<Utc>>,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Placeholder published before the first computation.
    pub fn empty(monitor: impl Into<String>) -> Self {
        Self {
            monitor: monitor.into(),
            computed_at: None,
            points: Vec::new(),
        }
    }
}

/// A metric derived from a snapshot of the interaction log.
pub trait Monitor: Send + Sync {
    fn monitor_name(&self) -> String;

    fn compute(&self, records: &[InteractionRecord], now: DateTime<Utc>) -> MetricSeries;
}

/// Shared tail of every monitor: split per plan, then map each batch to a value.
pub(crate) fn series_from_batches<F>(
    monitor: String,
    plan: &BatchPlan,
    records: &[InteractionRecord],
    now: DateTime<Utc>,
    value: F,
) -> MetricSeries
where
    F: Fn(&Batch<'_>) -> f64,
{
    let points = plan
        .split(records, now)
        .iter()
        .map(|batch| MetricPoint {
            label: batch.label.clone(),
            start: batch.start,
            end: batch.end,
            value: value(batch),
            sample_count: batch.records.len(),
        })
        .collect();

    MetricSeries {
        monitor,
        computed_at: Some(now),
        points,
    }
}

/// Throughput, accuracy and latency monitors configured from `config`.
pub fn standard_monitors(config: &MonitorConfig) -> Vec<Arc<dyn Monitor>> {
    vec![
        Arc::new(ThroughputMonitor::new(
            config.throughput_bucket,
            config.throughput_window,
        )),
        Arc::new(AccuracyMonitor::new(
            config.accuracy_batch_size,
            config.accuracy_max_batches,
        )),
        Arc::new(LatencyMonitor::new(
            config.latency_batch_size,
            config.latency_max_batches,
            config.latency_lookback,
        )),
    ]
}
