//! Fetch-train-predict and verification cycles, and their scheduler.

mod context;
mod cycle;
mod scheduler;

pub use context::ForecastContext;
pub use cycle::{
    FetchCycleReport, VerifyCycleReport, run_fetch_cycle, run_fetch_cycle_with, run_verify_cycle,
};
pub use scheduler::Scheduler;
