use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::defs::ItemCode;
use crate::defs::ModelSnapshot;
use crate::defs::Outcome;
use crate::defs::OutcomeCount;
use crate::defs::PredictionModel;
use crate::defs::TrainingExample;
use crate::defs::signature;

/// Outcome served for signatures the model never saw.
pub const DEFAULT_UNSEEN_OUTCOME: &str = "A";

/// Predicts the most frequent desired outcome per item-signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyModel {
    version: u32,
    trained_at: Option<DateTime<Utc>>,
    frequencies: BTreeMap<String, Vec<OutcomeCount>>,
    default_outcome: Outcome,
}

impl FrequencyModel {
    /// Count desired outcomes per signature, keeping first-seen order.
    pub fn train(version: u32, dataset: &[TrainingExample], trained_at: DateTime<Utc>) -> Self {
        let mut frequencies: BTreeMap<String, Vec<OutcomeCount>> = BTreeMap::new();

        for example in dataset {
            let counts = frequencies.entry(signature(&example.items)).or_default();
            match counts.iter_mut().find(|c| c.outcome == example.desired_outcome) {
                Some(entry) => entry.count += 1,
                None => counts.push(OutcomeCount {
                    outcome: example.desired_outcome.clone(),
                    count: 1,
                }),
            }
        }

        debug!(
            "Trained frequency model v{} on {} examples ({} signatures)",
            version,
            dataset.len(),
            frequencies.len()
        );

        Self {
            version,
            trained_at: Some(trained_at),
            frequencies,
            default_outcome: default_unseen_outcome(),
        }
    }

    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        if snapshot.version == 0 {
            bail!("model snapshot has version 0");
        }
        Ok(Self {
            version: snapshot.version,
            trained_at: snapshot.trained_at,
            frequencies: snapshot.frequencies,
            default_outcome: default_unseen_outcome(),
        })
    }

    pub fn to_snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            version: self.version,
            trained_at: self.trained_at,
            frequencies: self.frequencies.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_snapshot()).context("serializing model snapshot")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: ModelSnapshot =
            serde_json::from_str(json).context("parsing model snapshot")?;
        Self::from_snapshot(snapshot)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.frequencies.keys().map(String::as_str)
    }

    pub fn counts_for(&self, signature: &str) -> Option<&[OutcomeCount]> {
        self.frequencies.get(signature).map(Vec::as_slice)
    }

    /// Synchronous lookup behind [`PredictionModel::predict`].
    pub fn predict_signature(&self, signature: &str) -> Outcome {
        let Some(counts) = self.frequencies.get(signature) else {
            return self.default_outcome.clone();
        };

        // Strictly greater keeps the earliest outcome on ties.
        let mut best: Option<&OutcomeCount> = None;
        for entry in counts {
            if best.is_none_or(|b| entry.count > b.count) {
                best = Some(entry);
            }
        }

        best.map(|b| b.outcome.clone())
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

fn default_unseen_outcome() -> Outcome {
    Outcome::new(DEFAULT_UNSEEN_OUTCOME).expect("default outcome is a valid code")
}

#[async_trait]
impl PredictionModel for FrequencyModel {
    fn model_name(&self) -> String {
        format!("frequency-v{}", self.version)
    }

    fn version(&self) -> Option<u32> {
        Some(self.version)
    }

    async fn predict(&self, items: &[ItemCode]) -> Result<Outcome> {
        Ok(self.predict_signature(&signature(items)))
    }

    fn snapshot(&self) -> Option<ModelSnapshot> {
        Some(self.to_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> ItemCode {
        ItemCode::new(s).unwrap()
    }

    fn example(items: &[&str], desired: &str) -> TrainingExample {
        TrainingExample {
            items: items.iter().map(|s| code(s)).collect(),
            desired_outcome: code(desired),
        }
    }

    #[test]
    fn majority_outcome_wins_regardless_of_item_order() {
        let mut data = Vec::new();
        data.extend(std::iter::repeat_n(example(&["A", "B"], "X"), 3));
        data.extend(std::iter::repeat_n(example(&["B", "A"], "Y"), 2));
        let model = FrequencyModel::train(1, &data, Utc::now());

        assert_eq!(model.predict_signature(&signature(&[code("B"), code("A")])), code("X"));
    }

    #[test]
    fn ties_resolve_to_first_seen_outcome() {
        let data = vec![
            example(&["C"], "Y"),
            example(&["C"], "X"),
            example(&["C"], "X"),
            example(&["C"], "Y"),
        ];
        let model = FrequencyModel::train(1, &data, Utc::now());

        assert_eq!(model.predict_signature("C"), code("Y"));
    }

    #[test]
    fn unseen_signature_gets_default() {
        let model = FrequencyModel::train(1, &[example(&["A"], "B")], Utc::now());
        assert_eq!(model.predict_signature("D,D"), code(DEFAULT_UNSEEN_OUTCOME));
    }

    #[test]
    fn snapshot_json_preserves_tie_order() {
        let data = vec![example(&["A"], "Z"), example(&["A"], "B")];
        let model = FrequencyModel::train(4, &data, Utc::now());

        let restored = FrequencyModel::from_json(&model.to_json().unwrap()).unwrap();

        assert_eq!(restored, model);
        assert_eq!(restored.predict_signature("A"), code("Z"));
    }

    #[test]
    fn version_zero_snapshot_is_rejected() {
        let snapshot = ModelSnapshot {
            version: 0,
            trained_at: None,
            frequencies: BTreeMap::new(),
        };
        assert!(FrequencyModel::from_snapshot(snapshot).is_err());
    }
}
