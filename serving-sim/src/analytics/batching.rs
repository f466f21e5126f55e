use crate::types::InteractionRecord;
use chrono::{DateTime, Duration, Utc};

/// How a record stream is cut into batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Partition {
    /// Consecutive runs of `n` records; a short trailing run is dropped.
    FixedSize(usize),
    /// Epoch-aligned time buckets; the bucket containing `now` is dropped
    /// and empty buckets are kept.
    FixedDuration(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPlan {
    pub partition: Partition,
    /// Keep only the last this many batches.
    pub max_batches: usize,
    /// Ignore records older than `now - lookback`.
    pub lookback: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Batch<'a> {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub records: Vec<&'a InteractionRecord>,
}

impl BatchPlan {
    pub fn split<'a>(&self, records: &'a [InteractionRecord], now: DateTime<Utc>) -> Vec<Batch<'a>> {
        let cutoff = self.lookback.map(|lookback| now - lookback);
        let mut ordered: Vec<&InteractionRecord> = records
            .iter()
            .filter(|r| cutoff.is_none_or(|cutoff| r.timestamp >= cutoff))
            .collect();
        ordered.sort_by_key(|r| r.timestamp);

        let mut batches = match self.partition {
            Partition::FixedSize(size) => by_size(&ordered, size),
            Partition::FixedDuration(width) => by_duration(&ordered, width, self.max_batches, now),
        };

        let excess = batches.len().saturating_sub(self.max_batches);
        batches.drain(..excess);
        batches
    }
}

fn by_size<'a>(ordered: &[&'a InteractionRecord], size: usize) -> Vec<Batch<'a>> {
    if size == 0 {
        return Vec::new();
    }
    ordered
        .chunks_exact(size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            label: format!("{}-{}", index * size + 1, (index + 1) * size),
            start: chunk[0].timestamp,
            end: chunk[size - 1].timestamp,
            records: chunk.to_vec(),
        })
        .collect()
}

fn by_duration<'a>(
    ordered: &[&'a InteractionRecord],
    width: Duration,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<Batch<'a>> {
    let width_ms = width.num_milliseconds();
    if width_ms <= 0 || count == 0 {
        return Vec::new();
    }

    let current = now.timestamp_millis().div_euclid(width_ms);
    let first = current - count as i64;

    let mut batches: Vec<Batch<'a>> = (first..current)
        .filter_map(|bucket| {
            let start = DateTime::from_timestamp_millis(bucket * width_ms)?;
            Some(Batch {
                label: start.format("%H:%M:%S").to_string(),
                start,
                end: start + width,
                records: Vec::new(),
            })
        })
        .collect();

    for record in ordered {
        let bucket = record.timestamp.timestamp_millis().div_euclid(width_ms);
        if (first..current).contains(&bucket) {
            let start = bucket * width_ms;
            if let Some(batch) = batches
                .iter_mut()
                .find(|b| b.start.timestamp_millis() == start)
            {
                batch.records.push(record);
            }
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Code, Interaction};
    use chrono::TimeZone;

    fn record(seq: u64, at: DateTime<Utc>) -> InteractionRecord {
        let a = Code::new("A").unwrap();
        InteractionRecord::from_interaction(
            seq,
            Interaction {
                timestamp: at,
                items: vec![a.clone()],
                desired_outcome: a.clone(),
                predicted_outcome: a,
                latency_ms: 1.0,
            },
        )
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn fixed_size_drops_partial_tail_and_keeps_last() {
        let records: Vec<_> = (1..=23)
            .map(|i| record(i, base() + Duration::seconds(i as i64)))
            .collect();
        let plan = BatchPlan {
            partition: Partition::FixedSize(5),
            max_batches: 3,
            lookback: None,
        };

        let batches = plan.split(&records, base() + Duration::minutes(1));
        let labels: Vec<_> = batches.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["6-10", "11-15", "16-20"]);
        assert!(batches.iter().all(|b| b.records.len() == 5));
    }

    #[test]
    fn fixed_size_sorts_by_timestamp() {
        let records = vec![
            record(1, base() + Duration::seconds(3)),
            record(2, base() + Duration::seconds(1)),
            record(3, base() + Duration::seconds(2)),
        ];
        let plan = BatchPlan {
            partition: Partition::FixedSize(3),
            max_batches: 10,
            lookback: None,
        };

        let batches = plan.split(&records, base() + Duration::minutes(1));
        let order: Vec<_> = batches[0].records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn lookback_excludes_old_records() {
        let now = base() + Duration::minutes(30);
        let mut records: Vec<_> = (1..=5).map(|i| record(i, base())).collect();
        records.extend((6..=10).map(|i| record(i, now - Duration::minutes(1))));
        let plan = BatchPlan {
            partition: Partition::FixedSize(5),
            max_batches: 10,
            lookback: Some(Duration::minutes(10)),
        };

        let batches = plan.split(&records, now);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records[0].sequence_number, 6);
    }

    #[test]
    fn duration_buckets_skip_current_and_keep_empty() {
        let now = base() + Duration::seconds(17);
        let records = vec![
            record(1, base() + Duration::seconds(1)),
            record(2, base() + Duration::seconds(4)),
            record(3, base() + Duration::seconds(11)),
            record(4, base() + Duration::seconds(16)),
        ];
        let plan = BatchPlan {
            partition: Partition::FixedDuration(Duration::seconds(5)),
            max_batches: 4,
            lookback: None,
        };

        let batches = plan.split(&records, now);
        let sizes: Vec<_> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![0, 2, 0, 1]);
        assert_eq!(batches[3].label, "12:00:10");
        assert_eq!(batches[3].end, base() + Duration::seconds(15));
    }
}
