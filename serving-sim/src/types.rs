use chrono::Duration;
use std::time::Duration as StdDuration;
use serde::{Deserialize, Serialize};

pub use interfaces::defs::{
    Code, Interaction, InteractionRecord, ItemCode, ModelSnapshot, Outcome, PredictionModel,
    TrainingExample,
};

/// Floor for the delay between two ticks, in milliseconds.
pub const MIN_DELAY_MS: u64 = 10;

/// Target requests per second for a fresh session.
pub const DEFAULT_RATE_PER_SECOND: f64 = 1.0;

/// Pause between pipeline stages when not in accelerated mode, in milliseconds.
pub const THINK_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub item_catalog: Vec<ItemCode>,
    pub outcome_catalog: Vec<Outcome>,
    pub max_items_per_request: usize,
    pub min_delay_ms: u64,
    pub think_delay_ms: u64,
    pub default_rate_per_second: f64,
    /// Recorded in place of a prediction when the model call fails.
    pub fallback_outcome: Outcome,
    /// Served by the constant model while no trained version is active.
    pub constant_outcome: Outcome,
    pub analytics_cadence_ms: u64,
    pub monitors: MonitorConfig,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            item_catalog: letters(),
            outcome_catalog: letters(),
            max_items_per_request: 5,
            min_delay_ms: MIN_DELAY_MS,
            think_delay_ms: THINK_DELAY_MS,
            default_rate_per_second: DEFAULT_RATE_PER_SECOND,
            fallback_outcome: letter("A"),
            constant_outcome: letter("D"),
            analytics_cadence_ms: 5_000,
            monitors: MonitorConfig::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub throughput_bucket: Duration,
    pub throughput_window: Duration,
    pub accuracy_batch_size: usize,
    pub accuracy_max_batches: usize,
    pub latency_batch_size: usize,
    pub latency_max_batches: usize,
    pub latency_lookback: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            throughput_bucket: Duration::seconds(5),
            throughput_window: Duration::minutes(5),
            accuracy_batch_size: 5,
            accuracy_max_batches: 10,
            latency_batch_size: 5,
            latency_max_batches: 10,
            latency_lookback: Some(Duration::minutes(10)),
        }
    }
}

fn letter(code: &str) -> Code {
    Code::new(code).expect("single letters are valid codes")
}

fn letters() -> Vec<Code> {
    ["A", "B", "C", "D"].into_iter().map(letter).collect()
}

/// Rate and pacing settings the scheduler reads at the start of every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub operating: bool,
    pub accelerated_mode: bool,
    pub target_rate_per_second: f64,
}

impl SchedulerSettings {
    /// `max(min_delay, 1000 / rate)` ms; accelerated mode always uses `min_delay`.
    ///
    /// A rate too small for `1 / rate` to fit in a `Duration` waits `Duration::MAX`.
    pub fn inter_tick_delay(&self, min_delay: StdDuration) -> StdDuration {
        if self.accelerated_mode {
            return min_delay;
        }
        StdDuration::try_from_secs_f64(1.0 / self.target_rate_per_second)
            .unwrap_or(StdDuration::MAX)
            .max(min_delay)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            operating: false,
            accelerated_mode: false,
            target_rate_per_second: DEFAULT_RATE_PER_SECOND,
        }
    }
}

pub fn validate_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(SimulatorError::InvalidRate { rate })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Candidate version {candidate} is stale: registry is already at version {current}, retrain")]
    StaleVersion { candidate: u32, current: u32 },

    #[error("Model version {version} is active and cannot be deleted")]
    ActiveModelInUse { version: u32 },

    #[error("Model version {version} not found")]
    ModelNotFound { version: u32 },

    #[error("Invalid target rate: {rate} (must be a positive number)")]
    InvalidRate { rate: f64 },

    #[error("Invalid sequence range: {start}..={end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Log codec error on line {line}: {reason}")]
    Codec { line: usize, reason: String },

    #[error("Scheduler has been shut down")]
    SchedulerStopped,

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
