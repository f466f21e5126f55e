use super::{series_from_batches, BatchPlan, MetricSeries, Monitor, Partition};
use crate::types::InteractionRecord;
use chrono::{DateTime, Duration, Utc};

pub const LATENCY_MONITOR: &str = "latency";

/// Mean prediction latency in milliseconds per fixed-size batch.
pub struct LatencyMonitor {
    plan: BatchPlan,
}

impl LatencyMonitor {
    pub fn new(batch_size: usize, max_batches: usize, lookback: Option<Duration>) -> Self {
        Self {
            plan: BatchPlan {
                partition: Partition::FixedSize(batch_size),
                max_batches,
                lookback,
            },
        }
    }
}

impl Monitor for LatencyMonitor {
    fn monitor_name(&self) -> String {
        LATENCY_MONITOR.to_string()
    }

    fn compute(&self, records: &[InteractionRecord], now: DateTime<Utc>) -> MetricSeries {
        series_from_batches(self.monitor_name(), &self.plan, records, now, |batch| {
            let total: f64 = batch.records.iter().map(|r| r.latency_ms).sum();
            total / batch.records.len() as f64
        })
    }
}
