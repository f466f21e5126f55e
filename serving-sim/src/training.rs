use crate::interaction_log::InteractionLog;
use crate::types::{InteractionRecord, Result, SimulatorError, TrainingExample};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Which validated records become training examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    All,
    /// Every other record, keyed on odd sequence numbers.
    #[default]
    OddSequenceNumbers,
}

impl FromStr for Sampling {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Sampling::All),
            "odd" | "odd_sequence_numbers" => Ok(Sampling::OddSequenceNumbers),
            other => Err(SimulatorError::General(format!(
                "unknown sampling '{}', expected 'all' or 'odd'",
                other
            ))),
        }
    }
}

impl fmt::Display for Sampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sampling::All => write!(f, "all"),
            Sampling::OddSequenceNumbers => write!(f, "odd"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EmptyItems,
    SatisfiedMismatch,
    InvalidLatency,
    OutOfOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub sequence_number: u64,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn flagged(&self) -> HashSet<u64> {
        self.issues.iter().map(|i| i.sequence_number).collect()
    }
}

/// Records in `start..=end` as the training source.
pub async fn extract(log: &InteractionLog, start: u64, end: u64) -> Result<Vec<InteractionRecord>> {
    if start > end {
        return Err(SimulatorError::InvalidRange { start, end });
    }
    let records = log.query(start, end).await;
    info!("Extracted {} records from #{}..=#{}", records.len(), start, end);
    Ok(records)
}

pub fn validate(records: &[InteractionRecord]) -> ValidationReport {
    let mut issues = Vec::new();
    let mut previous: Option<u64> = None;

    for record in records {
        let seq = record.sequence_number;
        let mut flag = |kind: IssueKind| issues.push(ValidationIssue { sequence_number: seq, kind });

        if record.items.is_empty() {
            flag(IssueKind::EmptyItems);
        }
        if record.satisfied != (record.desired_outcome == record.predicted_outcome) {
            flag(IssueKind::SatisfiedMismatch);
        }
        if !record.latency_ms.is_finite() || record.latency_ms < 0.0 {
            flag(IssueKind::InvalidLatency);
        }
        if previous.is_some_and(|prev| seq <= prev) {
            flag(IssueKind::OutOfOrder);
        }
        previous = Some(seq);
    }

    if !issues.is_empty() {
        warn!("Validation flagged {} issues in {} records", issues.len(), records.len());
    }

    ValidationReport {
        checked: records.len(),
        issues,
    }
}

/// Validate, drop flagged records, then sample.
pub fn prepare(records: &[InteractionRecord], sampling: Sampling) -> Vec<TrainingExample> {
    let flagged = validate(records).flagged();
    let examples: Vec<TrainingExample> = records
        .iter()
        .filter(|r| !flagged.contains(&r.sequence_number))
        .filter(|r| match sampling {
            Sampling::All => true,
            Sampling::OddSequenceNumbers => r.sequence_number % 2 == 1,
        })
        .map(TrainingExample::from)
        .collect();

    debug!(
        "Prepared {} examples from {} records ({} sampling)",
        examples.len(),
        records.len(),
        sampling
    );
    examples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Code, Interaction};
    use chrono::Utc;

    fn record(seq: u64, items: &[&str], desired: &str, predicted: &str) -> InteractionRecord {
        InteractionRecord::from_interaction(
            seq,
            Interaction {
                timestamp: Utc::now(),
                items: items.iter().map(|i| Code::new(*i).unwrap()).collect(),
                desired_outcome: Code::new(desired).unwrap(),
                predicted_outcome: Code::new(predicted).unwrap(),
                latency_ms: 2.5,
            },
        )
    }

    #[test]
    fn odd_sampling_keeps_odd_sequence_numbers() {
        let records: Vec<_> = (1..=6).map(|i| record(i, &["A"], "B", "B")).collect();
        let examples = prepare(&records, Sampling::OddSequenceNumbers);
        assert_eq!(examples.len(), 3);
        assert_eq!(prepare(&records, Sampling::All).len(), 6);
    }

    #[test]
    fn flagged_records_are_dropped() {
        let mut broken = record(3, &["A"], "B", "C");
        broken.satisfied = true;
        let mut slow = record(5, &["A"], "B", "B");
        slow.latency_ms = f64::NAN;
        let records = vec![
            record(1, &["A"], "B", "B"),
            record(2, &[], "B", "B"),
            broken,
            record(4, &["C"], "D", "A"),
            slow,
        ];

        let report = validate(&records);
        let kinds: Vec<_> = report.issues.iter().map(|i| (i.sequence_number, i.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (2, IssueKind::EmptyItems),
                (3, IssueKind::SatisfiedMismatch),
                (5, IssueKind::InvalidLatency),
            ]
        );

        let examples = prepare(&records, Sampling::All);
        assert_eq!(examples.len(), 2);
    }

    #[test]
    fn out_of_order_is_flagged() {
        let records = vec![record(4, &["A"], "A", "A"), record(2, &["A"], "A", "A")];
        let report = validate(&records);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::OutOfOrder);
    }

    #[test]
    fn sampling_parses() {
        assert_eq!("odd".parse::<Sampling>().unwrap(), Sampling::OddSequenceNumbers);
        assert_eq!("all".parse::<Sampling>().unwrap(), Sampling::All);
        assert!("half".parse::<Sampling>().is_err());
    }
}
