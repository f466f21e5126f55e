use super::{series_from_batches, BatchPlan, MetricSeries, Monitor, Partition};
use crate::types::InteractionRecord;
use chrono::{DateTime, Duration, Utc};

pub const THROUGHPUT_MONITOR: &str = "throughput";

/// Requests per second over epoch-aligned buckets covering the recent window.
pub struct ThroughputMonitor {
    bucket: Duration,
    plan: BatchPlan,
}

impl ThroughputMonitor {
    pub fn new(bucket: Duration, window: Duration) -> Self {
        let bucket_ms = bucket.num_milliseconds().max(1);
        let buckets = (window.num_milliseconds() / bucket_ms).max(1) as usize;
        Self {
            bucket,
            plan: BatchPlan {
                partition: Partition::FixedDuration(bucket),
                max_batches: buckets,
                lookback: None,
            },
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.plan.max_batches
    }
}

impl Monitor for ThroughputMonitor {
    fn monitor_name(&self) -> String {
        THROUGHPUT_MONITOR.to_string()
    }

    fn compute(&self, records: &[InteractionRecord], now: DateTime<Utc>) -> MetricSeries {
        let seconds = self.bucket.num_milliseconds() as f64 / 1000.0;
        series_from_batches(self.monitor_name(), &self.plan, records, now, |batch| {
            if seconds > 0.0 {
                batch.records.len() as f64 / seconds
            } else {
                0.0
            }
        })
    }
}
