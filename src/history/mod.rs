//! Observed outcomes, forecasts and session statistics.
//!
//! The store contracts are narrow: dedup-on-append, create-if-absent and
//! resolve-once are the only record writes, which is what lets the fetch and
//! verify cycles overlap safely.

pub mod analytics;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{MemoryStore, StoreOptions};

use crate::error::{DatabaseError, RecordError};

/// Coarse bucket of a draw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Low,
    High,
}

impl Category {
    /// `High` for 5-9, `Low` for 0-4.
    pub fn of(value: u8) -> Self {
        if value >= 5 { Self::High } else { Self::Low }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::High => "HIGH",
        }
    }
}

/// Reconciliation state of a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Win => "WIN",
            Self::Loss => "LOSS",
        }
    }
}

/// One observed draw. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub issue_id: String,
    pub value: u8,
    pub category: Category,
    pub observed_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        issue_id: impl Into<String>,
        value: u8,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        let issue_id = issue_id.into().trim().to_string();
        if issue_id.is_empty() {
            return Err(RecordError::EmptyIssueId);
        }
        if value > 9 {
            return Err(RecordError::ValueOutOfRange {
                issue_id,
                value: value.to_string(),
            });
        }
        Ok(Self {
            issue_id,
            value,
            category: Category::of(value),
            observed_at,
        })
    }
}

/// A forecast for an upcoming issue, resolved at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRecord {
    pub issue_id: String,
    pub predicted_value: u8,
    pub predicted_category: Category,
    /// Bounded score in `[0, 1]`, not a calibrated probability.
    pub confidence: f64,
    pub outcome: Outcome,
    pub actual_value: Option<u8>,
    pub actual_category: Option<Category>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Tier name, `fallback` or `bootstrap`.
    pub model_tier: String,
    #[serde(default)]
    pub pattern: Option<crate::forecast::PatternKind>,
}

impl ForecastRecord {
    pub fn is_pending(&self) -> bool {
        self.outcome == Outcome::Pending
    }

    /// Fill in the observed result. Returns `false` if already resolved.
    pub fn resolve(&mut self, resolution: &Resolution, at: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.outcome = resolution.outcome;
        self.actual_value = Some(resolution.actual_value);
        self.actual_category = Some(resolution.actual_category);
        self.resolved_at = Some(at);
        true
    }

    /// Whether the predicted category matched, once resolved.
    pub fn category_hit(&self) -> Option<bool> {
        self.actual_category.map(|c| c == self.predicted_category)
    }
}

/// The observed result applied to a pending forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub outcome: Outcome,
    pub actual_value: u8,
    pub actual_category: Category,
}

impl Resolution {
    /// Judge `predicted` against an observed draw: exact value match wins.
    pub fn judge(predicted: u8, observed: &OutcomeRecord) -> Self {
        Self {
            outcome: if predicted == observed.value {
                Outcome::Win
            } else {
                Outcome::Loss
            },
            actual_value: observed.value,
            actual_category: observed.category,
        }
    }

    /// `(wins, losses)` this resolution adds to the session totals.
    pub fn tally(&self) -> (u64, u64) {
        match self.outcome {
            Outcome::Win => (1, 0),
            _ => (0, 1),
        }
    }
}

/// Running win/loss totals. `total == wins + losses` always.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStat {
    pub wins: u64,
    pub losses: u64,
    pub total: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionStat {
    pub fn record(&mut self, wins: u64, losses: u64, at: DateTime<Utc>) {
        self.wins += wins;
        self.losses += losses;
        self.total = self.wins + self.losses;
        self.updated_at = Some(at);
    }

    pub fn win_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.wins as f64 / self.total as f64
        }
    }
}

/// Result ordering for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Which forecasts a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForecastFilter {
    #[default]
    All,
    Pending,
    Resolved,
}

impl ForecastFilter {
    pub fn matches(self, record: &ForecastRecord) -> bool {
        match self {
            Self::All => true,
            Self::Pending => record.is_pending(),
            Self::Resolved => !record.is_pending(),
        }
    }
}

/// Deduplicated, append-only outcome history keyed by issue id.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store `record` unless its issue id is already present.
    async fn append_if_absent(&self, record: OutcomeRecord) -> Result<bool, DatabaseError>;

    /// Up to `limit` records, with the newest selected first.
    async fn query(&self, limit: usize, order: Order) -> Result<Vec<OutcomeRecord>, DatabaseError>;

    async fn find_by_id(&self, issue_id: &str) -> Result<Option<OutcomeRecord>, DatabaseError>;
}

/// Forecasts keyed by issue id.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Store `record` unless a forecast for its issue id exists.
    async fn create_if_absent(&self, record: ForecastRecord) -> Result<bool, DatabaseError>;

    /// Up to `limit` matching forecasts, newest issue first.
    async fn query(
        &self,
        filter: ForecastFilter,
        limit: usize,
    ) -> Result<Vec<ForecastRecord>, DatabaseError>;

    async fn get(&self, issue_id: &str) -> Result<Option<ForecastRecord>, DatabaseError>;

    /// Resolve a pending forecast. `false` when missing or already resolved.
    async fn update_once(
        &self,
        issue_id: &str,
        resolution: Resolution,
    ) -> Result<bool, DatabaseError>;
}

/// Session win/loss counter.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn increment(&self, wins: u64, losses: u64) -> Result<SessionStat, DatabaseError>;

    async fn current(&self) -> Result<SessionStat, DatabaseError>;
}

/// Forecasts and session totals that resolve together.
#[async_trait]
pub trait LedgerStore: ForecastStore + StatsStore {
    /// Resolve a pending forecast and add it to the session totals as one
    /// write. Returns the totals after this resolution, or `None` when the
    /// forecast is missing or already resolved (and nothing was counted).
    async fn resolve_and_count(
        &self,
        issue_id: &str,
        resolution: Resolution,
    ) -> Result<Option<SessionStat>, DatabaseError>;
}
