//! The forecasting engine: windows, tiered models, selection and heuristics.

pub mod engine;
pub mod fallback;
pub mod pattern;
pub mod registry;
pub mod window;

pub use engine::{ForecastDraft, ForecastSource, forecast, next_issue_id};
pub use pattern::PatternKind;
pub use registry::{ModelRegistry, Tier, TierOutcome, TrainingReport};
