//! Accuracy analytics over resolved forecasts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::DatabaseError;
use crate::history::{ForecastFilter, ForecastRecord, ForecastStore, Outcome};

/// Accuracy of one forecast source (tier, `fallback` or `bootstrap`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceStats {
    pub resolved: u64,
    pub wins: u64,
    pub accuracy: f64,
}

/// Aggregate accuracy of resolved forecasts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub resolved: u64,
    pub pending: u64,
    pub wins: u64,
    pub losses: u64,
    /// Exact value hit rate.
    pub accuracy: f64,
    /// LOW/HIGH hit rate.
    pub category_accuracy: f64,
    /// Consecutive wins counting back from the newest resolved forecast.
    pub win_streak: u64,
    pub mean_confidence: f64,
    pub by_source: BTreeMap<String, SourceStats>,
}

fn rate(hits: u64, total: u64) -> f64 {
    if total > 0 {
        hits as f64 / total as f64
    } else {
        0.0
    }
}

impl AccuracyReport {
    /// Build a report from forecasts ordered newest first.
    pub fn from_records(records: &[ForecastRecord]) -> Self {
        let mut report = Self::default();
        let mut category_hits = 0;
        let mut confidence_sum = 0.0;
        let mut streak_open = true;

        for record in records {
            if record.is_pending() {
                report.pending += 1;
                continue;
            }
            report.resolved += 1;
            confidence_sum += record.confidence;
            let win = record.outcome == Outcome::Win;
            if win {
                report.wins += 1;
            } else {
                report.losses += 1;
            }
            if streak_open && win {
                report.win_streak += 1;
            } else {
                streak_open = false;
            }
            if record.category_hit() == Some(true) {
                category_hits += 1;
            }

            let source = report
                .by_source
                .entry(record.model_tier.clone())
                .or_default();
            source.resolved += 1;
            if win {
                source.wins += 1;
            }
        }

        report.accuracy = rate(report.wins, report.resolved);
        report.category_accuracy = rate(category_hits, report.resolved);
        report.mean_confidence = if report.resolved > 0 {
            confidence_sum / report.resolved as f64
        } else {
            0.0
        };
        for source in report.by_source.values_mut() {
            source.accuracy = rate(source.wins, source.resolved);
        }
        report
    }
}

/// Load up to `limit` recent forecasts and summarise them.
pub async fn accuracy_report(
    store: &dyn ForecastStore,
    limit: usize,
) -> Result<AccuracyReport, DatabaseError> {
    let records = store.query(ForecastFilter::All, limit).await?;
    Ok(AccuracyReport::from_records(&records))
}
