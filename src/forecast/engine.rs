//! Forecast production for the next unseen issue.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::InferenceError;
use crate::forecast::fallback;
use crate::forecast::pattern::{self, PATTERN_LOOKBACK, PatternKind};
use crate::forecast::registry::{ModelRegistry, Tier};
use crate::forecast::window::{WINDOW_LEN, latest_window};
use crate::history::{Category, ForecastRecord, Outcome, OutcomeRecord};
use crate::model::{NUM_CLASSES, SequenceModel};

/// History length below which forecasts are uniform guesses.
pub const BOOTSTRAP_MIN_HISTORY: usize = 5;

/// Where a forecast came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastSource {
    Bootstrap,
    Model(Tier),
    Fallback,
}

impl ForecastSource {
    /// Label stored as the forecast's model tier.
    pub fn label(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Model(tier) => tier.as_str(),
            Self::Fallback => "fallback",
        }
    }
}

/// A forecast before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastDraft {
    pub issue_id: String,
    pub predicted_value: u8,
    pub confidence: f64,
    pub source: ForecastSource,
    pub pattern: Option<PatternKind>,
}

impl ForecastDraft {
    pub fn into_record(self, created_at: DateTime<Utc>) -> ForecastRecord {
        ForecastRecord {
            predicted_category: Category::of(self.predicted_value),
            issue_id: self.issue_id,
            predicted_value: self.predicted_value,
            confidence: self.confidence.clamp(0.0, 1.0),
            outcome: Outcome::Pending,
            actual_value: None,
            actual_category: None,
            created_at,
            resolved_at: None,
            model_tier: self.source.label().to_string(),
            pattern: self.pattern,
        }
    }
}

/// Produce a draft for the issue after the newest record in `history`
/// (ordered oldest first).
///
/// `None` when history is empty: there is no issue id to advance from.
pub fn forecast<R: Rng + ?Sized>(
    registry: &ModelRegistry,
    history: &[OutcomeRecord],
    rng: &mut R,
) -> Option<ForecastDraft> {
    let issue_id = next_issue_id(&history.last()?.issue_id);

    if history.len() < BOOTSTRAP_MIN_HISTORY {
        return Some(ForecastDraft {
            issue_id,
            predicted_value: rng.gen_range(0..NUM_CLASSES as u8),
            confidence: rng.gen_range(0.5..=0.8),
            source: ForecastSource::Bootstrap,
            pattern: None,
        });
    }

    let values: Vec<u8> = history.iter().map(|r| r.value).collect();
    let newest_first: Vec<u8> = values.iter().rev().copied().collect();

    let modelled = match registry.select(values.len()) {
        Some((tier, model)) => match infer(tier, model, &values) {
            Ok(base) => Some((tier, base)),
            Err(e) => {
                tracing::warn!(tier = %tier, error = %e, "Inference failed, using fallback");
                None
            }
        },
        None => {
            tracing::debug!(history_len = values.len(), "No eligible model, using fallback");
            None
        }
    };

    let draft = match modelled {
        Some((tier, (prediction, confidence))) => {
            let overlay = pattern::apply(
                prediction,
                confidence,
                &newest_first[..newest_first.len().min(PATTERN_LOOKBACK)],
            );
            ForecastDraft {
                issue_id,
                predicted_value: overlay.prediction,
                confidence: overlay.confidence,
                source: ForecastSource::Model(tier),
                pattern: Some(overlay.pattern),
            }
        }
        None => {
            let (value, confidence) = fallback::predict(&newest_first, rng);
            ForecastDraft {
                issue_id,
                predicted_value: value,
                confidence,
                source: ForecastSource::Fallback,
                pattern: None,
            }
        }
    };
    Some(draft)
}

fn infer(
    tier: Tier,
    model: &dyn SequenceModel,
    values: &[u8],
) -> Result<(u8, f64), InferenceError> {
    let window = latest_window(values, WINDOW_LEN);
    let probs = model
        .predict_proba(&window)
        .map_err(|source| InferenceError::Model {
            tier: tier.to_string(),
            source,
        })?;
    read_distribution(tier, &probs)
}

/// Argmax (first maximum wins) and `max / sum` confidence.
fn read_distribution(tier: Tier, probs: &[f64]) -> Result<(u8, f64), InferenceError> {
    let malformed = |reason: String| InferenceError::MalformedOutput {
        tier: tier.to_string(),
        reason,
    };
    if probs.len() != NUM_CLASSES {
        return Err(malformed(format!(
            "distribution has {} classes, expected {}",
            probs.len(),
            NUM_CLASSES
        )));
    }
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(malformed("distribution has a negative or non-finite entry".to_string()));
    }
    let sum: f64 = probs.iter().sum();
    if sum <= 0.0 {
        return Err(malformed("distribution sums to zero".to_string()));
    }
    let mut best = 0;
    for (i, &p) in probs.iter().enumerate().skip(1) {
        if p > probs[best] {
            best = i;
        }
    }
    Ok((best as u8, probs[best] / sum))
}

/// Increment the trailing run of digits in `issue_id`, keeping its width and
/// any prefix. `"20240101999"` becomes `"20240102000"`; an all-nines run
/// widens (`"A99"` → `"A100"`); an id without trailing digits gains a `1`.
pub fn next_issue_id(issue_id: &str) -> String {
    let digits_start = issue_id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map_or(issue_id.len(), |(i, _)| i);
    let (prefix, digits) = issue_id.split_at(digits_start);
    if digits.is_empty() {
        return format!("{}1", prefix);
    }

    let mut bytes = digits.as_bytes().to_vec();
    let mut carry = true;
    for b in bytes.iter_mut().rev() {
        if !carry {
            break;
        }
        if *b == b'9' {
            *b = b'0';
        } else {
            *b += 1;
            carry = false;
        }
    }
    let mut next = String::with_capacity(issue_id.len() + 1);
    next.push_str(prefix);
    if carry {
        next.push('1');
    }
    next.extend(bytes.into_iter().map(char::from));
    next
}
