//! Short-term structure detection over the most recent values.

use serde::{Deserialize, Serialize};

/// Number of recent values examined.
pub const PATTERN_LOOKBACK: usize = 10;

/// Upper bound on any overlaid confidence.
pub const CONFIDENCE_CEILING: f64 = 0.95;

/// Which rule fired. Checked in declaration order; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Repeating,
    Sequential,
    Alternating,
    None,
}

impl PatternKind {
    pub fn boost(self) -> f64 {
        match self {
            Self::Repeating => 0.15,
            Self::Sequential => 0.20,
            Self::Alternating => 0.10,
            Self::None => 0.05,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Repeating => "repeating",
            Self::Sequential => "sequential",
            Self::Alternating => "alternating",
            Self::None => "none",
        }
    }
}

/// Prediction after the overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub prediction: u8,
    pub confidence: f64,
    pub pattern: PatternKind,
}

/// Detect a pattern in `recent` (index 0 = most recent, at most
/// [`PATTERN_LOOKBACK`] values are read) and return the predicted value it implies.
pub fn detect(recent: &[u8]) -> Option<(PatternKind, u8)> {
    let recent = &recent[..recent.len().min(PATTERN_LOOKBACK)];
    let (&last, _) = recent.split_first()?;

    if recent.iter().filter(|&&v| v == last).count() >= 3 {
        return Some((PatternKind::Repeating, (last + 1) % 10));
    }

    if let &[v0, v1, v2, ..] = recent
        && v0 == (v1 + 1) % 10
        && v1 == (v2 + 1) % 10
    {
        return Some((PatternKind::Sequential, (v0 + 1) % 10));
    }

    if let &[v0, v1, v2, v3, ..] = recent
        && v2 == v0
        && v3 == v1
    {
        return Some((PatternKind::Alternating, v1));
    }

    None
}

/// Apply the overlay to a base prediction. Confidence only ever increases,
/// then is clamped to [`CONFIDENCE_CEILING`].
pub fn apply(base_prediction: u8, base_confidence: f64, recent: &[u8]) -> Overlay {
    let (pattern, prediction) =
        detect(recent).unwrap_or((PatternKind::None, base_prediction));
    Overlay {
        prediction,
        confidence: (base_confidence + pattern.boost()).min(CONFIDENCE_CEILING),
        pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repeating_takes_precedence() {
        let recent = [3, 3, 3, 1, 2, 4, 5, 6, 7, 8];
        let overlay = apply(0, 0.4, &recent);
        assert_eq!(overlay.pattern, PatternKind::Repeating);
        assert_eq!(overlay.prediction, 4);
        assert!((overlay.confidence - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_repeating_counts_anywhere_in_lookback() {
        // 6 appears three times but not adjacently.
        let recent = [6, 1, 6, 2, 8, 6, 0, 4, 9, 3];
        assert_eq!(detect(&recent), Some((PatternKind::Repeating, 7)));
    }

    #[test]
    fn test_repeating_ignores_values_beyond_lookback() {
        let recent = [6, 1, 6, 2, 8, 4, 0, 4, 9, 3, 6, 6];
        assert_ne!(detect(&recent).map(|(k, _)| k), Some(PatternKind::Repeating));
    }

    #[test]
    fn test_sequential_wraps_modulo_ten() {
        let recent = [1, 0, 9, 5];
        assert_eq!(detect(&recent), Some((PatternKind::Sequential, 2)));
        let overlay = apply(5, 0.5, &recent);
        assert!((overlay.confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_descending_run_is_not_sequential() {
        assert_eq!(detect(&[3, 4, 5]), None);
    }

    #[test]
    fn test_alternating_predicts_second_value() {
        let recent = [4, 7, 4, 7, 1];
        assert_eq!(detect(&recent), Some((PatternKind::Alternating, 7)));
    }

    #[test]
    fn test_none_keeps_base_prediction() {
        let overlay = apply(8, 0.3, &[1, 5, 2, 9]);
        assert_eq!(overlay.pattern, PatternKind::None);
        assert_eq!(overlay.prediction, 8);
        assert!((overlay.confidence - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let overlay = apply(2, 0.9, &[5, 4, 3]);
        assert_eq!(overlay.pattern, PatternKind::Sequential);
        assert_eq!(overlay.confidence, CONFIDENCE_CEILING);
    }

    #[test]
    fn test_short_history_has_no_pattern() {
        assert_eq!(detect(&[]), None);
        assert_eq!(detect(&[2, 1]), None);
    }
}
