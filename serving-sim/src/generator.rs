use crate::types::{ItemCode, Outcome, Result, SimulatorError};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// A synthetic request before it has been served.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub timestamp: DateTime<Utc>,
    pub items: Vec<ItemCode>,
    pub desired_outcome: Outcome,
}

/// Draws random requests: 1..=max items from the item catalog and one desired outcome.
pub struct RequestGenerator {
    items: Vec<ItemCode>,
    outcomes: Vec<Outcome>,
    max_items: usize,
    rng: StdRng,
}

impl RequestGenerator {
    pub fn new(
        items: Vec<ItemCode>,
        outcomes: Vec<Outcome>,
        max_items: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if items.is_empty() || outcomes.is_empty() {
            return Err(SimulatorError::General(
                "item and outcome catalogs must not be empty".to_string(),
            ));
        }
        if max_items == 0 {
            return Err(SimulatorError::General(
                "requests need room for at least one item".to_string(),
            ));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            items,
            outcomes,
            max_items,
            rng,
        })
    }

    pub fn generate(&mut self) -> Request {
        let count = self.rng.gen_range(1..=self.max_items);
        let items = (0..count)
            .filter_map(|_| self.items.choose(&mut self.rng).cloned())
            .collect();
        let desired_outcome = self
            .outcomes
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| self.outcomes[0].clone());

        Request {
            timestamp: Utc::now(),
            items,
            desired_outcome,
        }
    }
}
