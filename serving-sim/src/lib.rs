pub mod types;
pub mod log_codec;
pub mod metadata;
pub mod interaction_log;
pub mod holder;
pub mod registry;
pub mod generator;
pub mod scheduler;
pub mod analytics;
pub mod training;
pub mod session;

pub use types::*;
pub use metadata::{MetadataStore, SessionMetadata};
pub use interaction_log::{InteractionLog, LogEvent};
pub use holder::ModelHolder;
pub use registry::{CandidateModel, ModelRegistry, ModelSummary};
pub use generator::{Request, RequestGenerator};
pub use scheduler::{Scheduler, SchedulerPhase, SchedulerStats};
pub use analytics::{AnalyticsHub, MetricPoint, MetricSeries, Monitor};
pub use training::{Sampling, ValidationReport};
pub use session::Simulation;
