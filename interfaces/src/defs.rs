use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Characters reserved by the persisted log row format.
const RESERVED: &[char] = &[',', ';', '"', '\n', '\r'];

/// Short code naming an item on a request or an outcome served back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

pub type ItemCode = Code;
pub type Outcome = Code;

impl Code {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            bail!("code must not be empty");
        }
        if value.contains(RESERVED) {
            bail!("code {:?} contains a reserved separator", value);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Code {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Code {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.0
    }
}

/// Sorted, comma-joined form of an item list. Order of `items` is irrelevant.
pub fn signature(items: &[ItemCode]) -> String {
    let mut sorted: Vec<&str> = items.iter().map(Code::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// A served request before the log has numbered it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub items: Vec<ItemCode>,
    pub desired_outcome: Outcome,
    pub predicted_outcome: Outcome,
    pub latency_ms: f64,
}

impl Interaction {
    pub fn satisfied(&self) -> bool {
        self.desired_outcome == self.predicted_outcome
    }
}

/// An appended, immutable row of the interaction log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub items: Vec<ItemCode>,
    pub desired_outcome: Outcome,
    pub predicted_outcome: Outcome,
    pub latency_ms: f64,
    pub satisfied: bool,
}

impl InteractionRecord {
    pub fn from_interaction(sequence_number: u64, interaction: Interaction) -> Self {
        let satisfied = interaction.satisfied();
        Self {
            sequence_number,
            timestamp: interaction.timestamp,
            items: interaction.items,
            desired_outcome: interaction.desired_outcome,
            predicted_outcome: interaction.predicted_outcome,
            latency_ms: interaction.latency_ms,
            satisfied,
        }
    }

    pub fn signature(&self) -> String {
        signature(&self.items)
    }
}

/// One labelled row of a training dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingExample {
    pub items: Vec<ItemCode>,
    pub desired_outcome: Outcome,
}

impl From<&InteractionRecord> for TrainingExample {
    fn from(record: &InteractionRecord) -> Self {
        Self {
            items: record.items.clone(),
            desired_outcome: record.desired_outcome.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCount {
    pub outcome: Outcome,
    pub count: u64,
}

/// Persisted form of a trained model.
///
/// Each signature's counts are kept in the order their outcomes were first
/// seen during training; prediction ties resolve to the earliest entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub version: u32,
    pub trained_at: Option<DateTime<Utc>>,
    pub frequencies: BTreeMap<String, Vec<OutcomeCount>>,
}

/// Anything able to serve a prediction for a request's items.
#[async_trait]
pub trait PredictionModel: Send + Sync + fmt::Debug {
    fn model_name(&self) -> String;

    /// Registry version, `None` for models that never enter the registry.
    fn version(&self) -> Option<u32>;

    async fn predict(&self, items: &[ItemCode]) -> Result<Outcome>;

    fn snapshot(&self) -> Option<ModelSnapshot>;
}
