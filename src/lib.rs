//! drawcast: scheduled draw-history ingestion, tiered model training and
//! forecast reconciliation.
//!
//! The [`orchestrator`] drives two periodic cycles over an explicit
//! [`orchestrator::ForecastContext`]: fetch-train-predict and verification.

pub mod cli;
pub mod config;
pub mod error;
pub mod forecast;
pub mod history;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod source;

pub use config::Config;
pub use error::{Error, Result};
