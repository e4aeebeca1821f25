//! Tiered model registry: eligibility, training and selection.
//!
//! The registry owns one state slot per [`Tier`]. Tiers are visited in
//! [`Tier::ALL`] order, which is also the tie-break order during selection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrainingError;
use crate::forecast::window::{WINDOW_LEN, build_windows};
use crate::model::{self, FitConfig, SequenceModel};

/// History length below which a training trigger is a no-op.
pub const MIN_TRAINING_HISTORY: usize = 10;

/// Model complexity tiers, least complex first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Small dense network.
    Compact,
    /// Convolutional feature extractor.
    Convolutional,
    /// Elman recurrent network.
    Recurrent,
    /// Wide dense network.
    Deep,
    /// Convolutional features plus the raw window.
    Hybrid,
    /// Averaged dense networks.
    Ensemble,
}

impl Tier {
    /// All tiers in evaluation and tie-break order.
    pub const ALL: [Tier; 6] = [
        Tier::Compact,
        Tier::Convolutional,
        Tier::Recurrent,
        Tier::Deep,
        Tier::Hybrid,
        Tier::Ensemble,
    ];

    /// Minimum history length before this tier may train or be selected.
    pub fn eligibility_threshold(self) -> usize {
        match self {
            Tier::Compact => 50,
            Tier::Convolutional => 200,
            Tier::Recurrent => 500,
            Tier::Deep => 1000,
            Tier::Hybrid => 1500,
            Tier::Ensemble => 2000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Compact => "compact",
            Tier::Convolutional => "convolutional",
            Tier::Recurrent => "recurrent",
            Tier::Deep => "deep",
            Tier::Hybrid => "hybrid",
            Tier::Ensemble => "ensemble",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.as_str() == s)
    }

    pub fn is_eligible(self, history_len: usize) -> bool {
        self.eligibility_threshold() <= history_len
    }

    /// Freshly initialised model for this tier.
    pub fn build_model(self, seed: u64) -> Box<dyn SequenceModel> {
        match self {
            Tier::Compact => model::mlp(&[32, 32], seed),
            Tier::Convolutional => model::convolutional(16, &[32], false, seed),
            Tier::Recurrent => model::recurrent(32, &[32], seed),
            Tier::Deep => model::mlp(&[128, 64, 32], seed),
            Tier::Hybrid => model::convolutional(32, &[64, 32], true, seed),
            Tier::Ensemble => model::ensemble(3, &[64, 32], seed),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Training bookkeeping for one tier.
#[derive(Debug)]
pub struct TierState {
    pub tier: Tier,
    pub model: Option<Box<dyn SequenceModel>>,
    /// Final-epoch training loss of the last successful fit.
    pub last_loss: f64,
    pub last_validation_loss: Option<f64>,
    pub trained_at: Option<DateTime<Utc>>,
    /// Successful fits so far.
    pub fits: u64,
}

impl TierState {
    fn new(tier: Tier) -> Self {
        Self {
            tier,
            model: None,
            last_loss: f64::INFINITY,
            last_validation_loss: None,
            trained_at: None,
            fits: 0,
        }
    }
}

/// What happened to one tier during a training pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierOutcome {
    Trained {
        loss: f64,
        validation_loss: Option<f64>,
        samples: usize,
    },
    Skipped {
        threshold: usize,
    },
    Failed {
        error: String,
    },
}

/// Summary of one training trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub history_len: usize,
    /// Empty when the history was below [`MIN_TRAINING_HISTORY`].
    pub tiers: Vec<(Tier, TierOutcome)>,
}

impl TrainingReport {
    pub fn trained(&self) -> usize {
        self.tiers
            .iter()
            .filter(|(_, o)| matches!(o, TierOutcome::Trained { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tiers
            .iter()
            .filter(|(_, o)| matches!(o, TierOutcome::Failed { .. }))
            .count()
    }
}

/// Per-tier model states plus the shared fit configuration.
#[derive(Debug)]
pub struct ModelRegistry {
    states: [TierState; 6],
    fit: FitConfig,
    last_trained_len: Option<usize>,
}

impl ModelRegistry {
    pub fn new(fit: FitConfig) -> Self {
        Self {
            states: Tier::ALL.map(TierState::new),
            fit,
            last_trained_len: None,
        }
    }

    pub fn state(&self, tier: Tier) -> &TierState {
        &self.states[tier.index()]
    }

    pub fn states(&self) -> impl Iterator<Item = &TierState> {
        self.states.iter()
    }

    pub fn fit_config(&self) -> &FitConfig {
        &self.fit
    }

    /// True until a training pass has run on at least [`MIN_TRAINING_HISTORY`]
    /// values. Models live in memory, so a restarted process retrains once.
    pub fn needs_initial_training(&self) -> bool {
        self.last_trained_len.is_none()
    }

    /// Train every eligible tier on `values` (oldest first).
    ///
    /// Each tier fits a clone of its current model; the clone replaces the
    /// stored model only on success, so a failing tier keeps its prior state
    /// and never stops the others.
    pub fn train(&mut self, values: &[u8]) -> TrainingReport {
        let history_len = values.len();
        if history_len < MIN_TRAINING_HISTORY {
            tracing::debug!(
                history_len,
                floor = MIN_TRAINING_HISTORY,
                "History below training floor"
            );
            return TrainingReport {
                history_len,
                tiers: Vec::new(),
            };
        }

        let windows = build_windows(values, WINDOW_LEN);
        let mut tiers = Vec::with_capacity(Tier::ALL.len());

        for state in &mut self.states {
            let tier = state.tier;
            if !tier.is_eligible(history_len) {
                tiers.push((
                    tier,
                    TierOutcome::Skipped {
                        threshold: tier.eligibility_threshold(),
                    },
                ));
                continue;
            }

            let mut candidate = match &state.model {
                Some(model) => model.clone(),
                None => tier.build_model(self.fit.seed.wrapping_add(tier.index() as u64)),
            };

            let outcome = match candidate.fit(&windows, &self.fit) {
                Ok(report) if report.loss.is_finite() => {
                    tracing::info!(
                        tier = %tier,
                        architecture = %candidate.architecture(),
                        loss = report.loss,
                        validation_loss = ?report.validation_loss,
                        samples = report.samples,
                        "Tier trained"
                    );
                    state.model = Some(candidate);
                    state.last_loss = report.loss;
                    state.last_validation_loss = report.validation_loss;
                    state.trained_at = Some(Utc::now());
                    state.fits += 1;
                    TierOutcome::Trained {
                        loss: report.loss,
                        validation_loss: report.validation_loss,
                        samples: report.samples,
                    }
                }
                Ok(report) => {
                    let err = TrainingError::Fit {
                        tier: tier.to_string(),
                        source: crate::error::ModelError::Diverged {
                            epoch: report.epochs,
                            loss: report.loss,
                        },
                    };
                    tracing::warn!(tier = %tier, error = %err, "Tier training failed");
                    TierOutcome::Failed {
                        error: err.to_string(),
                    }
                }
                Err(source) => {
                    let err = TrainingError::Fit {
                        tier: tier.to_string(),
                        source,
                    };
                    tracing::warn!(tier = %tier, error = %err, "Tier training failed");
                    TierOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            tiers.push((tier, outcome));
        }

        self.last_trained_len = Some(history_len);
        TrainingReport { history_len, tiers }
    }

    /// The eligible trained tier with the lowest recorded loss.
    ///
    /// Ties go to the earliest tier in [`Tier::ALL`].
    pub fn select(&self, history_len: usize) -> Option<(Tier, &dyn SequenceModel)> {
        let mut best: Option<(&TierState, &dyn SequenceModel)> = None;
        for state in &self.states {
            if !state.tier.is_eligible(history_len) {
                continue;
            }
            let Some(model) = state.model.as_deref() else {
                continue;
            };
            if best.is_none_or(|(current, _)| state.last_loss < current.last_loss) {
                best = Some((state, model));
            }
        }
        best.map(|(state, model)| (state.tier, model))
    }

    #[cfg(test)]
    pub(crate) fn install(&mut self, tier: Tier, model: Box<dyn SequenceModel>, loss: f64) {
        let state = &mut self.states[tier.index()];
        state.model = Some(model);
        state.last_loss = loss;
    }
}
