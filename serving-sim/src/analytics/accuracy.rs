use super::{series_from_batches, BatchPlan, MetricSeries, Monitor, Partition};
use crate::types::InteractionRecord;
use chrono::{DateTime, Utc};

pub const ACCURACY_MONITOR: &str = "accuracy";

/// Percentage of satisfied requests per fixed-size batch.
pub struct AccuracyMonitor {
    plan: BatchPlan,
}

impl AccuracyMonitor {
    pub fn new(batch_size: usize, max_batches: usize) -> Self {
        Self {
            plan: BatchPlan {
                partition: Partition::FixedSize(batch_size),
                max_batches,
                lookback: None,
            },
        }
    }
}

impl Monitor for AccuracyMonitor {
    fn monitor_name(&self) -> String {
        ACCURACY_MONITOR.to_string()
    }

    fn compute(&self, records: &[InteractionRecord], now: DateTime<Utc>) -> MetricSeries {
        series_from_batches(self.monitor_name(), &self.plan, records, now, |batch| {
            let satisfied = batch.records.iter().filter(|r| r.satisfied).count();
            satisfied as f64 * 100.0 / batch.records.len() as f64
        })
    }
}
