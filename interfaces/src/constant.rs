use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::defs::ItemCode;
use crate::defs::ModelSnapshot;
use crate::defs::Outcome;
use crate::defs::PredictionModel;

/// Outcome served before any model has been trained.
pub const DEFAULT_CONSTANT_OUTCOME: &str = "D";

/// Serves the same outcome for every request.
#[derive(Debug, Clone)]
pub struct ConstantModel {
    outcome: Outcome,
    think_time: Duration,
}

impl ConstantModel {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            think_time: Duration::ZERO,
        }
    }

    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

impl Default for ConstantModel {
    fn default() -> Self {
        Self::new(Outcome::new(DEFAULT_CONSTANT_OUTCOME).expect("default outcome is a valid code"))
    }
}

#[async_trait]
impl PredictionModel for ConstantModel {
    fn model_name(&self) -> String {
        format!("constant({})", self.outcome)
    }

    fn version(&self) -> Option<u32> {
        None
    }

    async fn predict(&self, _items: &[ItemCode]) -> Result<Outcome> {
        if !self.think_time.is_zero() {
            tokio::time::sleep(self.think_time).await;
        }
        Ok(self.outcome.clone())
    }

    fn snapshot(&self) -> Option<ModelSnapshot> {
        None
    }
}
